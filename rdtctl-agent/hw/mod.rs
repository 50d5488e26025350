//! Hardware path: direct MSR programming
//!
//! Every function here takes the MSR collaborator explicitly and encodes or
//! decodes through `rdtctl_raw`. Writes are read-modify-write so bits outside
//! the programmed field survive.

pub mod assoc;
pub mod cat;
pub mod mba;
pub mod mon;

use rdtctl_raw::RegisterLayout;

use crate::common::MsrAccess;
use crate::error::Result;

pub fn read_register<T: RegisterLayout>(
    msr: &dyn MsrAccess,
    lcore: u32,
    reg: u32,
) -> Result<T> {
    Ok(T::from_msr_value(msr.read(lcore, reg)?))
}

/// Validate `layout` and write it to `reg`
pub fn write_register<T: RegisterLayout>(
    msr: &dyn MsrAccess,
    lcore: u32,
    reg: u32,
    layout: &T,
) -> Result<()> {
    let value = layout.try_to_msr_value()?;
    msr.write(lcore, reg, value)?;
    Ok(())
}
