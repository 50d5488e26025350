//! PQR association register
//!
//! ## Register Format
//!
//! | Bits   | Field     | Description                          |
//! |--------|-----------|--------------------------------------|
//! | 0-9    | rmid      | Resource Monitoring ID               |
//! | 10-31  | reserved  | Preserved across read-modify-write   |
//! | 32-63  | cos       | Class of Service                     |
//!
//! Writes to this register are read-modify-write and are not atomic. Callers
//! that may target the same logical core concurrently must serialize per
//! core.

use crate::error::Result;
use crate::register::{BitField, RegisterLayout};

pub const ASSOC_RMID: BitField = BitField::new("rmid", 0, 10);
pub const ASSOC_RESERVED: BitField = BitField::new("reserved", 10, 22);
pub const ASSOC_COS: BitField = BitField::new("cos", 32, 32);

/// Build an association value for `cos` and `rmid`, copying the reserved
/// bits from `preserved` (normally the value currently in the register).
pub fn encode_association(cos: u64, rmid: u64, preserved: u64) -> Result<u64> {
    let raw = preserved & ASSOC_RESERVED.mask();
    let raw = ASSOC_COS.insert(raw, cos)?;
    ASSOC_RMID.insert(raw, rmid)
}

/// Returns `(cos, rmid)`
pub fn decode_association(raw: u64) -> (u32, u32) {
    (
        ASSOC_COS.extract(raw) as u32,
        ASSOC_RMID.extract(raw) as u32,
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PqrAssoc {
    /// Resource Monitoring ID (RMID) for this logical processor
    pub rmid: u32,

    /// Reserved bits 10-31, kept as read
    pub reserved: u32,

    /// Class of Service (COS) for cache/memory allocation
    pub cos: u32,
}

impl PqrAssoc {
    pub fn with_cos(self, cos: u32) -> Self {
        Self { cos, ..self }
    }

    pub fn with_rmid(self, rmid: u32) -> Self {
        Self { rmid, ..self }
    }
}

impl RegisterLayout for PqrAssoc {
    fn to_msr_value(&self) -> u64 {
        (self.rmid as u64 & ASSOC_RMID.max())
            | ((self.reserved as u64 & ASSOC_RESERVED.max()) << ASSOC_RESERVED.shift)
            | ((self.cos as u64) << ASSOC_COS.shift)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            rmid: ASSOC_RMID.extract(value) as u32,
            reserved: ASSOC_RESERVED.extract(value) as u32,
            cos: ASSOC_COS.extract(value) as u32,
        }
    }

    fn validate(&self) -> Result<()> {
        let raw = ASSOC_RMID.insert(0, self.rmid as u64)?;
        ASSOC_RESERVED.insert(raw, self.reserved as u64)?;
        Ok(())
    }
}
