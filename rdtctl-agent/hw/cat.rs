//! Cache allocation mask registers, CDP aware

use rdtctl_raw::rdt::cat::{mask_msr, CacheLevel, CacheMask, CdpSlot, QosCfg, CBM_FIELD};

use crate::alloc::{CacheAllocEntry, CacheAllocMask};
use crate::common::MsrAccess;
use crate::error::Result;
use crate::hw::{read_register, write_register};

pub fn cdp_enabled(msr: &dyn MsrAccess, lcore: u32, level: CacheLevel) -> Result<bool> {
    let cfg: QosCfg = read_register(msr, lcore, level.qos_cfg_msr())?;
    Ok(cfg.cdp_enable)
}

/// Flip the CDP enable bit, keeping the rest of the QoS config register
pub fn set_cdp(msr: &dyn MsrAccess, lcore: u32, level: CacheLevel, enable: bool) -> Result<()> {
    let reg = level.qos_cfg_msr();
    let cfg: QosCfg = read_register(msr, lcore, reg)?;
    write_register(
        msr,
        lcore,
        reg,
        &QosCfg {
            cdp_enable: enable,
            ..cfg
        },
    )?;
    tracing::info!(
        "{} CDP {} on core {}",
        level,
        if enable { "enabled" } else { "disabled" },
        lcore
    );
    Ok(())
}

fn read_mask(
    msr: &dyn MsrAccess,
    lcore: u32,
    level: CacheLevel,
    cos: u32,
    slot: Option<CdpSlot>,
) -> Result<u64> {
    let raw = msr.read(lcore, mask_msr(level, cos, slot)?)?;
    Ok(CacheMask::from_raw(raw).bits())
}

fn write_mask(
    msr: &dyn MsrAccess,
    lcore: u32,
    level: CacheLevel,
    cos: u32,
    slot: Option<CdpSlot>,
    mask: CacheMask,
) -> Result<()> {
    let addr = mask_msr(level, cos, slot)?;
    let current = msr.read(lcore, addr)?;
    msr.write(lcore, addr, CBM_FIELD.insert(current, mask.bits())?)?;
    Ok(())
}

/// Masks of every class; CDP halves the number of classes
pub fn get(
    msr: &dyn MsrAccess,
    lcore: u32,
    level: CacheLevel,
    num_classes: u32,
) -> Result<Vec<CacheAllocEntry>> {
    let cdp = cdp_enabled(msr, lcore, level)?;
    let count = if cdp { num_classes / 2 } else { num_classes };

    (0..count)
        .map(|cos| {
            let mask = if cdp {
                CacheAllocMask::Cdp {
                    code: read_mask(msr, lcore, level, cos, Some(CdpSlot::Code))?,
                    data: read_mask(msr, lcore, level, cos, Some(CdpSlot::Data))?,
                }
            } else {
                CacheAllocMask::Unified(read_mask(msr, lcore, level, cos, None)?)
            };
            Ok(CacheAllocEntry {
                class_id: cos,
                mask,
            })
        })
        .collect()
}

/// Write already validated masks
///
/// With CDP enabled a unified mask is written to both the code and the data
/// register. With CDP disabled a split mask is refused by the caller before
/// it gets here.
pub fn set(
    msr: &dyn MsrAccess,
    lcore: u32,
    level: CacheLevel,
    cdp: bool,
    masks: &[(u32, CacheMask, CacheMask)],
) -> Result<()> {
    for &(cos, code, data) in masks {
        if cdp {
            write_mask(msr, lcore, level, cos, Some(CdpSlot::Data), data)?;
            write_mask(msr, lcore, level, cos, Some(CdpSlot::Code), code)?;
        } else {
            write_mask(msr, lcore, level, cos, None, data)?;
        }
        tracing::debug!("{} COS {} mask set on core {}", level, cos, lcore);
    }
    Ok(())
}
