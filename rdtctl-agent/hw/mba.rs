//! Bandwidth allocation registers

use crate::alloc::MbaEntry;
use crate::common::MsrAccess;
use crate::error::Result;
use crate::translate;
use crate::vendor::VendorProfile;
use rdtctl_raw::RegisterError;

/// Read the first `min(num_classes, max_classes)` classes of one socket
pub fn get(
    profile: &VendorProfile,
    msr: &dyn MsrAccess,
    lcore: u32,
    max_classes: usize,
) -> Result<Vec<MbaEntry>> {
    let info = profile.mba_info()?;
    let reg = profile.mba_register();
    let count = (info.num_classes as usize).min(max_classes);

    (0..count as u32)
        .map(|class_id| {
            let native = reg.decode(msr.read(lcore, reg.msr(class_id))?);
            let mb_max = translate::from_native(profile, native)?;
            Ok(MbaEntry::new(class_id, mb_max))
        })
        .collect()
}

/// Program the requested classes and report what the hardware committed
///
/// Every entry is validated before the first write. The returned entries
/// follow the request order and carry the percentage decoded from the
/// register after the write.
pub fn set(
    profile: &VendorProfile,
    msr: &dyn MsrAccess,
    lcore: u32,
    requested: &[MbaEntry],
) -> Result<Vec<MbaEntry>> {
    let info = profile.mba_info()?;
    let reg = profile.mba_register();

    let mut natives = Vec::with_capacity(requested.len());
    for entry in requested {
        if entry.class_id >= info.num_classes {
            return Err(RegisterError::out_of_range(
                "class_id",
                entry.class_id as u64,
                info.num_classes as u64 - 1,
            )
            .into());
        }
        natives.push(translate::to_native(profile, entry.mb_max)?);
    }

    let mut committed = Vec::with_capacity(requested.len());
    for (entry, native) in requested.iter().zip(natives) {
        let addr = reg.msr(entry.class_id);
        let current = msr.read(lcore, addr)?;
        msr.write(lcore, addr, reg.encode(current, native)?)?;

        let readback = reg.decode(msr.read(lcore, addr)?);
        let mb_max = translate::from_native(profile, readback)?;
        if mb_max != entry.mb_max {
            tracing::info!(
                "COS {} bandwidth requested {}%, committed {}%",
                entry.class_id,
                entry.mb_max,
                mb_max
            );
        }
        committed.push(MbaEntry::new(entry.class_id, mb_max));
    }

    Ok(committed)
}
