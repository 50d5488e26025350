//! Backend dispatch
//!
//! Every operation takes the [`Backend`] explicitly and routes to the
//! hardware path (MSRs) or the OS path (resctrl). Inputs are validated
//! before either path is touched, so a rejected request never leaves a
//! partial write behind.

use serde::Serialize;
use std::fmt;

use rdtctl_raw::rdt::cat::{CacheLevel, CacheMask, CdpSlot};
use rdtctl_raw::RegisterError;

use crate::alloc::{CacheAllocEntry, CacheAllocMask, MbaEntry};
use crate::capability::{Capabilities, CatInfo};
use crate::error::{RdtError, Result};
use crate::hw;
use crate::os::SchemataValue;
use crate::platform::Platform;
use crate::vendor::VendorProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Program MSRs directly
    Hardware,
    /// Delegate to resctrl
    Os,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Hardware => "hardware",
            Backend::Os => "os",
        })
    }
}

pub fn get_bandwidth(
    profile: &VendorProfile,
    backend: Backend,
    platform: &Platform,
    socket: u32,
    max_classes: usize,
) -> Result<Vec<MbaEntry>> {
    match backend {
        Backend::Hardware => profile.hw_mba_get(platform, socket, max_classes),
        Backend::Os => profile.os_mba_get(platform, socket, max_classes),
    }
}

/// Apply `requested` and return the committed percentages in request order
pub fn set_bandwidth(
    profile: &VendorProfile,
    backend: Backend,
    platform: &Platform,
    socket: u32,
    requested: &[MbaEntry],
) -> Result<Vec<MbaEntry>> {
    match backend {
        Backend::Hardware => profile.hw_mba_set(platform, socket, requested),
        Backend::Os => profile.os_mba_set(platform, socket, requested),
    }
}

fn cat_info(caps: &Capabilities, level: CacheLevel) -> Result<&CatInfo> {
    caps.cat(level).info().ok_or(match level {
        CacheLevel::L3 => RdtError::FeatureNotSupported("L3 cache allocation"),
        CacheLevel::L2 => RdtError::FeatureNotSupported("L2 cache allocation"),
    })
}

fn cdp_enabled(
    backend: Backend,
    platform: &Platform,
    level: CacheLevel,
    socket: u32,
) -> Result<bool> {
    match backend {
        Backend::Hardware => {
            let lcore = platform.socket_lcore(socket)?;
            hw::cat::cdp_enabled(platform.msr.as_ref(), lcore, level)
        }
        Backend::Os => Ok(platform.resctrl.cdp_enabled(level)?),
    }
}

pub fn get_cache_masks(
    caps: &Capabilities,
    backend: Backend,
    platform: &Platform,
    level: CacheLevel,
    socket: u32,
) -> Result<Vec<CacheAllocEntry>> {
    let info = cat_info(caps, level)?;

    match backend {
        Backend::Hardware => {
            let lcore = platform.socket_lcore(socket)?;
            hw::cat::get(platform.msr.as_ref(), lcore, level, info.num_classes)
        }
        Backend::Os => {
            let resctrl = &platform.resctrl;
            let max_classes = info.num_classes as usize;

            if !resctrl.cdp_enabled(level)? {
                let masks = resctrl.os_get_cache_masks(level, None, socket, max_classes)?;
                return Ok(masks
                    .into_iter()
                    .map(|m| CacheAllocEntry::unified(m.class_id, m.value))
                    .collect());
            }

            let code =
                resctrl.os_get_cache_masks(level, Some(CdpSlot::Code), socket, max_classes / 2)?;
            let data =
                resctrl.os_get_cache_masks(level, Some(CdpSlot::Data), socket, max_classes / 2)?;
            Ok(code
                .into_iter()
                .zip(data)
                .map(|(c, d)| CacheAllocEntry::cdp(c.class_id, c.value, d.value))
                .collect())
        }
    }
}

/// Validated `(class, code, data)` triples
fn validate_masks(
    info: &CatInfo,
    cdp: bool,
    requested: &[CacheAllocEntry],
) -> Result<Vec<(u32, CacheMask, CacheMask)>> {
    let num_classes = if cdp {
        info.num_classes / 2
    } else {
        info.num_classes
    };

    requested
        .iter()
        .map(|entry| {
            if entry.class_id >= num_classes {
                return Err(RegisterError::out_of_range(
                    "class_id",
                    entry.class_id as u64,
                    num_classes.saturating_sub(1) as u64,
                )
                .into());
            }
            if matches!(entry.mask, CacheAllocMask::Cdp { .. }) && !cdp {
                return Err(RdtError::FeatureNotSupported(
                    "Separate code and data masks without CDP",
                ));
            }
            let code = CacheMask::new(entry.mask.code(), info.num_ways)?;
            let data = CacheMask::new(entry.mask.data(), info.num_ways)?;
            Ok((entry.class_id, code, data))
        })
        .collect()
}

/// Apply cache masks and return the masks read back for the requested classes
pub fn set_cache_masks(
    caps: &Capabilities,
    backend: Backend,
    platform: &Platform,
    level: CacheLevel,
    socket: u32,
    requested: &[CacheAllocEntry],
) -> Result<Vec<CacheAllocEntry>> {
    let info = cat_info(caps, level)?;
    let cdp = cdp_enabled(backend, platform, level, socket)?;
    let masks = validate_masks(info, cdp, requested)?;

    match backend {
        Backend::Hardware => {
            let lcore = platform.socket_lcore(socket)?;
            hw::cat::set(platform.msr.as_ref(), lcore, level, cdp, &masks)?;
        }
        Backend::Os => {
            let values = |pick: fn(&(u32, CacheMask, CacheMask)) -> CacheMask| {
                masks
                    .iter()
                    .map(|m| SchemataValue::new(m.0, pick(m).bits()))
                    .collect::<Vec<_>>()
            };
            let resctrl = &platform.resctrl;
            if cdp {
                resctrl.os_set_cache_masks(level, Some(CdpSlot::Data), socket, &values(|m| m.2))?;
                resctrl.os_set_cache_masks(level, Some(CdpSlot::Code), socket, &values(|m| m.1))?;
            } else {
                resctrl.os_set_cache_masks(level, None, socket, &values(|m| m.2))?;
            }
        }
    }

    let current = get_cache_masks(caps, backend, platform, level, socket)?;
    Ok(requested
        .iter()
        .filter_map(|req| current.iter().find(|c| c.class_id == req.class_id).copied())
        .collect())
}

pub fn get_assoc(backend: Backend, platform: &Platform, lcore: u32) -> Result<u32> {
    match backend {
        Backend::Hardware => hw::assoc::get_cos(platform.msr.as_ref(), lcore),
        Backend::Os => Ok(platform.resctrl.os_get_assoc(lcore)?),
    }
}

/// Largest class count among the supported allocation features
fn max_alloc_classes(caps: &Capabilities) -> Result<u32> {
    [
        caps.l3ca.info().map(|i| i.num_classes),
        caps.l2ca.info().map(|i| i.num_classes),
        caps.mba.info().map(|i| i.num_classes),
    ]
    .into_iter()
    .flatten()
    .max()
    .ok_or(RdtError::FeatureNotSupported("Resource allocation"))
}

/// Associate `lcore` with `class_id`
///
/// On the hardware path this is a read-modify-write of the core's
/// association register; callers serialize per core.
pub fn set_assoc(
    caps: &Capabilities,
    backend: Backend,
    platform: &Platform,
    lcore: u32,
    class_id: u32,
) -> Result<()> {
    let num_classes = max_alloc_classes(caps)?;
    if class_id >= num_classes {
        return Err(
            RegisterError::out_of_range("class_id", class_id as u64, num_classes as u64 - 1)
                .into(),
        );
    }

    match backend {
        Backend::Hardware => hw::assoc::set_cos(platform.msr.as_ref(), lcore, class_id),
        Backend::Os => Ok(platform.resctrl.os_set_assoc(lcore, class_id)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::ResctrlError;
    use crate::testing::{self, FakeTopology, ResctrlTree};
    use rdtctl_raw::rdt::msr::{IA32_L3_QOS_CFG, IA32_PQR_ASSOC};

    fn intel_caps() -> Capabilities {
        Capabilities::discover(&FakeTopology::intel(), &testing::intel_profile())
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Hardware.to_string(), "hardware");
        assert_eq!(serde_json::to_string(&Backend::Os).unwrap(), "\"os\"");
    }

    #[test]
    fn test_bandwidth_hw_path() {
        let (platform, msr) = testing::hw_platform(FakeTopology::intel());
        let profile = testing::intel_profile();

        let committed = set_bandwidth(
            &profile,
            Backend::Hardware,
            &platform,
            1,
            &[MbaEntry::new(3, 45)],
        )
        .unwrap();
        assert_eq!(committed, vec![MbaEntry::new(3, 50)]);
        // Socket 1 is reached through its first core
        assert_eq!(msr.get(2, 0xD53), 50);

        let entries = get_bandwidth(&profile, Backend::Hardware, &platform, 1, 4).unwrap();
        assert_eq!(entries[3], MbaEntry::new(3, 50));
        assert!(matches!(
            get_bandwidth(&profile, Backend::Hardware, &platform, 9, 4),
            Err(RdtError::UnknownSocket(9))
        ));
    }

    #[test]
    fn test_bandwidth_os_path_never_touches_msrs() {
        let tree = ResctrlTree::new("MB:0=100;1=100\n", 8);
        let (platform, msr) = testing::os_platform_with_msr(FakeTopology::intel(), &tree);
        let profile = testing::intel_profile();

        let committed =
            set_bandwidth(&profile, Backend::Os, &platform, 0, &[MbaEntry::new(1, 60)]).unwrap();
        assert_eq!(committed, vec![MbaEntry::new(1, 60)]);
        assert!(msr.writes().is_empty());
    }

    #[test]
    fn test_os_error_is_not_translated() {
        let (platform, _) = testing::hw_platform(FakeTopology::intel());
        let err = set_bandwidth(
            &testing::intel_profile(),
            Backend::Os,
            &platform,
            0,
            &[MbaEntry::new(1, 60)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RdtError::BackendInterface(ResctrlError::NotMounted(_))
        ));
    }

    #[test]
    fn test_cache_masks_hw_path() {
        let (platform, msr) = testing::hw_platform(FakeTopology::intel());
        let caps = intel_caps();

        let committed = set_cache_masks(
            &caps,
            Backend::Hardware,
            &platform,
            CacheLevel::L3,
            0,
            &[CacheAllocEntry::unified(1, 0x0F0)],
        )
        .unwrap();
        assert_eq!(committed, vec![CacheAllocEntry::unified(1, 0x0F0)]);
        assert_eq!(msr.get(0, 0xC91), 0x0F0);

        let all = get_cache_masks(&caps, Backend::Hardware, &platform, CacheLevel::L3, 0).unwrap();
        assert_eq!(all.len(), 16);
    }

    #[test]
    fn test_non_contiguous_mask_rejected_before_write() {
        let (platform, msr) = testing::hw_platform(FakeTopology::intel());
        let caps = intel_caps();

        let err = set_cache_masks(
            &caps,
            Backend::Hardware,
            &platform,
            CacheLevel::L3,
            0,
            &[
                CacheAllocEntry::unified(1, 0x00F),
                CacheAllocEntry::unified(2, 0x101),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RdtError::Register(RegisterError::NonContiguousMask(0x101))
        ));
        assert!(msr.writes().is_empty());

        // 11-way cache
        assert!(set_cache_masks(
            &caps,
            Backend::Hardware,
            &platform,
            CacheLevel::L3,
            0,
            &[CacheAllocEntry::unified(1, 0xFFF)],
        )
        .is_err());
        assert!(msr.writes().is_empty());
    }

    #[test]
    fn test_cdp_masks_need_cdp() {
        let (platform, msr) = testing::hw_platform(FakeTopology::intel());
        let caps = intel_caps();
        let request = [CacheAllocEntry::cdp(1, 0x00F, 0x0F0)];

        assert!(matches!(
            set_cache_masks(&caps, Backend::Hardware, &platform, CacheLevel::L3, 0, &request),
            Err(RdtError::FeatureNotSupported(_))
        ));

        msr.set(0, IA32_L3_QOS_CFG, 1);
        let committed =
            set_cache_masks(&caps, Backend::Hardware, &platform, CacheLevel::L3, 0, &request)
                .unwrap();
        assert_eq!(committed, request.to_vec());
        assert_eq!(msr.get(0, 0xC92), 0x0F0);
        assert_eq!(msr.get(0, 0xC93), 0x00F);
    }

    #[test]
    fn test_cache_masks_os_path() {
        let tree = ResctrlTree::new("L3:0=7ff;1=7ff\n", 4);
        let platform = testing::os_platform(FakeTopology::intel(), &tree);
        let caps = intel_caps();

        let committed = set_cache_masks(
            &caps,
            Backend::Os,
            &platform,
            CacheLevel::L3,
            1,
            &[CacheAllocEntry::unified(3, 0x03)],
        )
        .unwrap();
        assert_eq!(committed, vec![CacheAllocEntry::unified(3, 0x03)]);
        assert_eq!(tree.schemata(3), "L3:0=7ff;1=3\n");

        let all = get_cache_masks(&caps, Backend::Os, &platform, CacheLevel::L3, 0).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_l2_absent_on_amd() {
        let (platform, _) = testing::hw_platform(FakeTopology::amd());
        let caps = Capabilities::discover(&FakeTopology::amd(), &testing::amd_profile());
        assert!(matches!(
            get_cache_masks(&caps, Backend::Hardware, &platform, CacheLevel::L2, 0),
            Err(RdtError::FeatureNotSupported(_))
        ));
    }

    #[test]
    fn test_assoc_hw_path() {
        let (platform, msr) = testing::hw_platform(FakeTopology::intel());
        let caps = intel_caps();
        msr.set(3, IA32_PQR_ASSOC, 0x0000_0000_0000_0009);

        set_assoc(&caps, Backend::Hardware, &platform, 3, 5).unwrap();
        assert_eq!(get_assoc(Backend::Hardware, &platform, 3).unwrap(), 5);
        assert_eq!(msr.get(3, IA32_PQR_ASSOC), 0x0000_0005_0000_0009);

        assert!(set_assoc(&caps, Backend::Hardware, &platform, 3, 16).is_err());
    }

    #[test]
    fn test_assoc_os_path() {
        let tree = ResctrlTree::new("L3:0=7ff\n", 4);
        let platform = testing::os_platform(FakeTopology::intel(), &tree);
        let caps = intel_caps();

        set_assoc(&caps, Backend::Os, &platform, 1, 2).unwrap();
        assert_eq!(get_assoc(Backend::Os, &platform, 1).unwrap(), 2);
        assert_eq!(tree.cpus(2), "1");
    }
}
