//! Allocation and monitoring capability discovery
//!
//! Cache allocation and monitoring are enumerated the same way on Intel and
//! AMD (CPUID leaves 0x10 and 0xF). Bandwidth allocation is vendor specific
//! and lives with the vendor profiles.
//!
//! A missing feature is reported as `NotSupported`, never as an error.

use serde::Serialize;

use rdtctl_raw::rdt::cat::CacheLevel;

use crate::common::{CpuidResult, Topology};
use crate::vendor::VendorProfile;

/// CPUID leaf 0x7 EBX: platform QoS enforcement
pub const CPUID_FEATURE_PQE_BIT: u32 = 15;
/// CPUID leaf 0x7 EBX: platform QoS monitoring
pub const CPUID_FEATURE_PQM_BIT: u32 = 12;

/// Resource IDs of CPUID leaf 0x10 (bit in EBX of subleaf 0, and subleaf)
pub const RES_ID_L3_ALLOCATION: u32 = 1;
pub const RES_ID_L2_ALLOCATION: u32 = 2;
pub const RES_ID_MB_ALLOCATION: u32 = 3;

/// CDP supported bit in ECX of the L3/L2 subleaf
pub const CPUID_CAT_CDP_BIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MbaInfo {
    pub num_classes: u32,
    /// Largest throttle (in percent) the hardware accepts
    pub throttle_max: u32,
    /// Throttle granularity in percent
    pub throttle_step: u32,
    pub is_linear: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BandwidthCapability {
    NotSupported,
    Supported(MbaInfo),
}

impl BandwidthCapability {
    pub fn info(&self) -> Option<&MbaInfo> {
        match self {
            BandwidthCapability::Supported(info) => Some(info),
            BandwidthCapability::NotSupported => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatInfo {
    pub level: CacheLevelName,
    pub num_classes: u32,
    /// Capacity bitmask length
    pub num_ways: u32,
    /// Bytes of cache per way, 0 when the cache leaf does not report it
    pub way_size: u64,
    /// Ways shared with other agents (e.g. I/O)
    pub way_contention: u64,
    pub cdp_supported: bool,
}

/// Serializable stand-in for [`CacheLevel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheLevelName {
    L2,
    L3,
}

impl From<CacheLevel> for CacheLevelName {
    fn from(level: CacheLevel) -> Self {
        match level {
            CacheLevel::L2 => CacheLevelName::L2,
            CacheLevel::L3 => CacheLevelName::L3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CatCapability {
    NotSupported,
    Supported(CatInfo),
}

impl CatCapability {
    pub fn info(&self) -> Option<&CatInfo> {
        match self {
            CatCapability::Supported(info) => Some(info),
            CatCapability::NotSupported => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonInfo {
    /// Highest usable RMID
    pub max_rmid: u32,
    /// Bytes per counter unit
    pub scale_factor: u32,
    /// Width of the MBM counters in bits
    pub counter_width: u32,
    pub llc_occupancy: bool,
    pub total_mem_bw: bool,
    pub local_mem_bw: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonCapability {
    NotSupported,
    Supported(MonInfo),
}

impl MonCapability {
    pub fn info(&self) -> Option<&MonInfo> {
        match self {
            MonCapability::Supported(info) => Some(info),
            MonCapability::NotSupported => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub l3ca: CatCapability,
    pub l2ca: CatCapability,
    pub mba: BandwidthCapability,
    pub mon: MonCapability,
}

impl Capabilities {
    pub fn discover(topology: &dyn Topology, profile: &VendorProfile) -> Self {
        Self {
            l3ca: discover_alloc_cat(topology, profile, CacheLevel::L3),
            l2ca: discover_alloc_cat(topology, profile, CacheLevel::L2),
            mba: profile.discover_alloc_mba(topology),
            mon: discover_mon(topology),
        }
    }

    pub fn cat(&self, level: CacheLevel) -> &CatCapability {
        match level {
            CacheLevel::L2 => &self.l2ca,
            CacheLevel::L3 => &self.l3ca,
        }
    }
}

/// Leaf 0x10 resource bit check shared by CAT and Intel MBA discovery
pub(crate) fn alloc_resource_present(topology: &dyn Topology, res_id: u32) -> bool {
    let leaf7 = topology.cpuid(0x7, 0);
    if !CpuidResult::bit(leaf7.ebx, CPUID_FEATURE_PQE_BIT) {
        return false;
    }
    CpuidResult::bit(topology.cpuid(0x10, 0).ebx, res_id)
}

pub fn discover_alloc_cat(
    topology: &dyn Topology,
    profile: &VendorProfile,
    level: CacheLevel,
) -> CatCapability {
    let res_id = match level {
        CacheLevel::L3 => RES_ID_L3_ALLOCATION,
        CacheLevel::L2 => RES_ID_L2_ALLOCATION,
    };

    if !alloc_resource_present(topology, res_id) {
        tracing::info!("{} CAT not detected", level);
        return CatCapability::NotSupported;
    }

    let r = topology.cpuid(0x10, res_id);
    let way_size = match topology.cache_topology_leaf(profile.cpuid_cache_leaf, level.number()) {
        Some(cache) => cache.way_size(),
        None => {
            tracing::warn!(
                "{} cache missing from CPUID leaf {:#x}, way size unknown",
                level,
                profile.cpuid_cache_leaf
            );
            0
        }
    };

    let info = CatInfo {
        level: level.into(),
        num_classes: (r.edx & 0xFFFF) + 1,
        num_ways: (r.eax & 0x1F) + 1,
        way_size,
        way_contention: r.ebx as u64,
        cdp_supported: CpuidResult::bit(r.ecx, CPUID_CAT_CDP_BIT),
    };

    tracing::info!(
        "{} CAT detected: {} classes, {} ways, CDP {}",
        level,
        info.num_classes,
        info.num_ways,
        if info.cdp_supported {
            "supported"
        } else {
            "not supported"
        }
    );

    CatCapability::Supported(info)
}

pub fn discover_mon(topology: &dyn Topology) -> MonCapability {
    let leaf7 = topology.cpuid(0x7, 0);
    if !CpuidResult::bit(leaf7.ebx, CPUID_FEATURE_PQM_BIT) {
        return MonCapability::NotSupported;
    }

    // Subleaf 0 EDX bit 1: L3 monitoring
    if !CpuidResult::bit(topology.cpuid(0xF, 0).edx, 1) {
        return MonCapability::NotSupported;
    }

    let r = topology.cpuid(0xF, 1);
    let scale_factor = if r.ebx == 0 {
        tracing::warn!("Monitoring scaling factor is 0, defaulting to 1");
        1
    } else {
        r.ebx
    };

    MonCapability::Supported(MonInfo {
        max_rmid: r.ecx,
        scale_factor,
        counter_width: 24 + (r.eax & 0xFF),
        llc_occupancy: CpuidResult::bit(r.edx, 0),
        total_mem_bw: CpuidResult::bit(r.edx, 1),
        local_mem_bw: CpuidResult::bit(r.edx, 2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTopology;
    use crate::vendor::Vendor;

    #[test]
    fn test_discover_l3ca() {
        let topo = FakeTopology::intel();
        let profile = VendorProfile::new(Vendor::Intel);
        let cap = discover_alloc_cat(&topo, &profile, CacheLevel::L3);
        let info = cap.info().unwrap();
        assert_eq!(info.num_classes, 16);
        assert_eq!(info.num_ways, 11);
        assert_eq!(info.way_size, 64 * 2048);
        assert!(info.cdp_supported);
    }

    #[test]
    fn test_discover_l2ca_absent_on_amd() {
        let topo = FakeTopology::amd();
        let profile = VendorProfile::new(Vendor::Amd);
        assert_eq!(
            discover_alloc_cat(&topo, &profile, CacheLevel::L2),
            CatCapability::NotSupported
        );
        assert!(discover_alloc_cat(&topo, &profile, CacheLevel::L3)
            .info()
            .is_some());
    }

    #[test]
    fn test_no_pqe_means_not_supported() {
        let topo = FakeTopology::intel().set_cpuid(0x7, 0, CpuidResult::default());
        let profile = VendorProfile::new(Vendor::Intel);
        let caps = Capabilities::discover(&topo, &profile);
        assert_eq!(caps.l3ca, CatCapability::NotSupported);
        assert_eq!(caps.l2ca, CatCapability::NotSupported);
        assert_eq!(caps.mba, BandwidthCapability::NotSupported);
        assert_eq!(caps.mon, MonCapability::NotSupported);
    }

    #[test]
    fn test_discover_mon() {
        let topo = FakeTopology::intel();
        let info = *discover_mon(&topo).info().unwrap();
        assert_eq!(info.max_rmid, 143);
        assert_eq!(info.scale_factor, 65536);
        assert_eq!(info.counter_width, 24);
        assert!(info.llc_occupancy && info.total_mem_bw && info.local_mem_bw);
    }
}
