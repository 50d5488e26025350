//! Core association through `IA32_PQR_ASSOC`
//!
//! Both setters read the register, replace one field and write it back.
//! The sequence is not atomic: concurrent callers targeting the same core
//! must serialize among themselves.

use rdtctl_raw::rdt::assoc::PqrAssoc;
use rdtctl_raw::rdt::msr::IA32_PQR_ASSOC;

use crate::common::MsrAccess;
use crate::error::Result;
use crate::hw::{read_register, write_register};

pub fn get(msr: &dyn MsrAccess, lcore: u32) -> Result<PqrAssoc> {
    read_register(msr, lcore, IA32_PQR_ASSOC)
}

pub fn get_cos(msr: &dyn MsrAccess, lcore: u32) -> Result<u32> {
    Ok(get(msr, lcore)?.cos)
}

pub fn set_cos(msr: &dyn MsrAccess, lcore: u32, cos: u32) -> Result<()> {
    let assoc = get(msr, lcore)?.with_cos(cos);
    write_register(msr, lcore, IA32_PQR_ASSOC, &assoc)?;
    tracing::debug!("Core {} associated with COS {}", lcore, cos);
    Ok(())
}

pub fn set_rmid(msr: &dyn MsrAccess, lcore: u32, rmid: u32) -> Result<()> {
    let assoc = get(msr, lcore)?.with_rmid(rmid);
    write_register(msr, lcore, IA32_PQR_ASSOC, &assoc)?;
    tracing::debug!("Core {} associated with RMID {}", lcore, rmid);
    Ok(())
}
