//! Memory bandwidth allocation register definitions
//!
//! | Vendor | Base MSR     | Field      | Native range | 0 means      |
//! |--------|--------------|------------|--------------|--------------|
//! | Intel  | 0xD50        | bits 0-15  | 0..=100      | no throttle  |
//! | AMD    | 0xC000_0200  | bits 0-11  | 0..=0x800    | no throttle  |
//!
//! Intel stores the throttle as a linear delay in percent. AMD stores a
//! delay scaled to `0..=0x800`; larger values restrict more on both.
//! One register per class of service, at `base + cos`.

use crate::error::{RegisterError, Result};
use crate::rdt::msr;
use crate::register::BitField;

/// Intel linear throttle maximum
pub const MBA_LINEAR_MAX: u64 = 100;

/// AMD native maximum
pub const MBA_MAX_AMD: u64 = 0x800;

pub const INTEL_MBA_DELAY: BitField = BitField::new("mba_delay", 0, 16);
pub const AMD_MBA_LIMIT: BitField = BitField::new("mba_limit", 0, 12);

/// How a vendor maps throttle percent to its native register value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbaEncoding {
    /// Native value is the throttle percent itself
    Linear,
    /// Native value is the throttle percent scaled to `0..=max`
    Delay,
}

/// Location and layout of a vendor's MBA registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbaRegister {
    pub base: u32,
    pub field: BitField,
    pub max: u64,
    pub encoding: MbaEncoding,
}

pub const INTEL_MBA: MbaRegister = MbaRegister {
    base: msr::IA32_L2_QOS_EXT_BW_THRTL_BASE,
    field: INTEL_MBA_DELAY,
    max: MBA_LINEAR_MAX,
    encoding: MbaEncoding::Linear,
};

pub const AMD_MBA: MbaRegister = MbaRegister {
    base: msr::AMD_L3_QOS_BW_CONTROL_BASE,
    field: AMD_MBA_LIMIT,
    max: MBA_MAX_AMD,
    encoding: MbaEncoding::Delay,
};

impl MbaRegister {
    pub fn msr(&self, cos: u32) -> u32 {
        self.base + cos
    }

    /// Place `native` into `preserved`, rejecting values above `max`
    pub fn encode(&self, preserved: u64, native: u64) -> Result<u64> {
        if native > self.max {
            return Err(RegisterError::out_of_range(self.field.name, native, self.max));
        }
        self.field.insert(preserved, native)
    }

    pub fn decode(&self, raw: u64) -> u64 {
        self.field.extract(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intel_encode() {
        assert_eq!(INTEL_MBA.msr(3), 0xD53);
        assert_eq!(INTEL_MBA.encode(0xFFFF_0000, 50).unwrap(), 0xFFFF_0032);
        assert!(INTEL_MBA.encode(0, 101).is_err());
    }

    #[test]
    fn test_amd_encode() {
        assert_eq!(AMD_MBA.msr(1), 0xC000_0201);
        assert_eq!(AMD_MBA.encode(0, 0x800).unwrap(), 0x800);
        assert_eq!(
            AMD_MBA.encode(0, 0x801),
            Err(RegisterError::out_of_range("mba_limit", 0x801, 0x800))
        );
        assert_eq!(AMD_MBA.decode(0xF000_0400), 0x400);
    }
}
