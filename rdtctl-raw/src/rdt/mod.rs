//! RDT / PQoS register definitions
//!
//! Intel and AMD share the association, monitoring and cache mask registers.
//! The memory bandwidth allocation registers differ in address and encoding,
//! see [`mba`].
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B,
//!   Section 18.19: Intel Resource Director Technology
//! - AMD64 Technology Platform Quality of Service Extensions, Pub. 56375

pub mod assoc;
pub mod cat;
pub mod mba;
pub mod mon;

/// MSR addresses common to both vendors
pub mod msr {
    /// L3 QoS Configuration - CDP enable
    pub const IA32_L3_QOS_CFG: u32 = 0xC81;

    /// L2 QoS Configuration - CDP enable
    pub const IA32_L2_QOS_CFG: u32 = 0xC82;

    /// QM Event Select - Select monitoring event and RMID
    pub const IA32_QM_EVTSEL: u32 = 0xC8D;

    /// QM Counter - Read monitoring counter value
    pub const IA32_QM_CTR: u32 = 0xC8E;

    /// PQR Association - Associate RMID and COS with logical processor
    pub const IA32_PQR_ASSOC: u32 = 0xC8F;

    /// First L3 cache allocation mask (COS 0)
    pub const IA32_L3_MASK_START: u32 = 0xC90;

    /// Last L3 cache allocation mask
    pub const IA32_L3_MASK_END: u32 = 0xD0F;

    /// First L2 cache allocation mask (COS 0)
    pub const IA32_L2_MASK_START: u32 = 0xD10;

    /// Last L2 cache allocation mask
    pub const IA32_L2_MASK_END: u32 = 0xD4F;

    /// Intel memory bandwidth throttle (COS 0)
    pub const IA32_L2_QOS_EXT_BW_THRTL_BASE: u32 = 0xD50;

    /// AMD L3 memory bandwidth limit (COS 0)
    pub const AMD_L3_QOS_BW_CONTROL_BASE: u32 = 0xC000_0200;
}
