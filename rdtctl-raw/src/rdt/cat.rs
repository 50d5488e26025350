//! Cache allocation (CAT / CDP) register definitions
//!
//! Each class of service owns one capacity bitmask register per cache level.
//! With Code and Data Prioritization enabled, every class owns a pair of
//! registers: the data mask at `base + 2 * cos` and the code mask right
//! after it.

use std::fmt;

use crate::error::{RegisterError, Result};
use crate::rdt::msr;
use crate::register::{BitField, RegisterLayout};

pub const QOS_CFG_CDP_ENABLE: BitField = BitField::new("cdp_enable", 0, 1);

/// Capacity bitmasks are at most 32 bits wide on current parts
pub const CBM_FIELD: BitField = BitField::new("cbm", 0, 32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheLevel {
    L2,
    L3,
}

impl CacheLevel {
    pub fn name(&self) -> &'static str {
        match self {
            CacheLevel::L2 => "L2",
            CacheLevel::L3 => "L3",
        }
    }

    /// Level number as reported by the cache topology CPUID leaf
    pub fn number(&self) -> u32 {
        match self {
            CacheLevel::L2 => 2,
            CacheLevel::L3 => 3,
        }
    }

    pub fn mask_range(&self) -> (u32, u32) {
        match self {
            CacheLevel::L2 => (msr::IA32_L2_MASK_START, msr::IA32_L2_MASK_END),
            CacheLevel::L3 => (msr::IA32_L3_MASK_START, msr::IA32_L3_MASK_END),
        }
    }

    pub fn qos_cfg_msr(&self) -> u32 {
        match self {
            CacheLevel::L2 => msr::IA32_L2_QOS_CFG,
            CacheLevel::L3 => msr::IA32_L3_QOS_CFG,
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which half of a CDP register pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdpSlot {
    Data,
    Code,
}

/// Address of the mask register for `cos`.
///
/// `slot` must be `Some` exactly when CDP is enabled on that level.
pub fn mask_msr(level: CacheLevel, cos: u32, slot: Option<CdpSlot>) -> Result<u32> {
    let (start, end) = level.mask_range();
    let count = (end - start + 1) as u64;

    let index = match slot {
        None => cos as u64,
        Some(CdpSlot::Data) => cos as u64 * 2,
        Some(CdpSlot::Code) => cos as u64 * 2 + 1,
    };

    if index >= count {
        let max_cos = match slot {
            None => count - 1,
            Some(_) => count / 2 - 1,
        };
        return Err(RegisterError::out_of_range("cos", cos as u64, max_cos));
    }

    Ok(start + index as u32)
}

/// A validated capacity bitmask: non-empty and contiguous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheMask(u64);

impl CacheMask {
    /// Validate `bits` against the capacity bitmask length `cbm_len`.
    pub fn new(bits: u64, cbm_len: u32) -> Result<Self> {
        if bits == 0 {
            return Err(RegisterError::EmptyMask);
        }

        let limit = BitField::new("cbm", 0, cbm_len.clamp(1, CBM_FIELD.width));
        if !limit.fits(bits) {
            return Err(RegisterError::out_of_range("cbm", bits, limit.max()));
        }

        if !is_contiguous(bits) {
            return Err(RegisterError::NonContiguousMask(bits));
        }

        Ok(Self(bits))
    }

    /// Every way available
    pub fn full(cbm_len: u32) -> Self {
        Self(BitField::new("cbm", 0, cbm_len.clamp(1, CBM_FIELD.width)).max())
    }

    /// Wrap a value read back from hardware without validating it
    pub fn from_raw(raw: u64) -> Self {
        Self(CBM_FIELD.extract(raw))
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn ways(&self) -> u32 {
        self.0.count_ones()
    }
}

impl fmt::Display for CacheMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A run of set bits with no holes
pub fn is_contiguous(bits: u64) -> bool {
    if bits == 0 {
        return false;
    }
    let shifted = bits >> bits.trailing_zeros();
    shifted & shifted.wrapping_add(1) == 0
}

/// L2/L3 QoS configuration register layout
///
/// Only bit 0 (CDP enable) is defined; other bits are kept as read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QosCfg {
    pub cdp_enable: bool,
    pub other: u64,
}

impl RegisterLayout for QosCfg {
    fn to_msr_value(&self) -> u64 {
        (self.other & !QOS_CFG_CDP_ENABLE.mask()) | (self.cdp_enable as u64)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            cdp_enable: QOS_CFG_CDP_ENABLE.extract(value) != 0,
            other: value & !QOS_CFG_CDP_ENABLE.mask(),
        }
    }
}
