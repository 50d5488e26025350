// CPU vendor, cache and socket topology

use serde::Serialize;
use std::collections::BTreeMap;

use crate::common::cpuid::{self, CpuidResult};
use crate::config::RdtConfig;

pub const VENDOR_INTEL: &str = "GenuineIntel";
pub const VENDOR_AMD: &str = "AuthenticAMD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VendorId {
    Intel,
    Amd,
    Unknown(String),
}

impl VendorId {
    pub fn from_signature(signature: &str) -> Self {
        match signature {
            VENDOR_INTEL => VendorId::Intel,
            VENDOR_AMD => VendorId::Amd,
            other => VendorId::Unknown(other.to_string()),
        }
    }
}

/// One cache level as enumerated by CPUID leaf 0x4 (Intel) or 0x8000001D
/// (AMD). Both leaves share the same register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheTopologyInfo {
    pub level: u32,
    pub num_ways: u32,
    pub num_partitions: u32,
    pub line_size: u32,
    pub num_sets: u32,
}

impl CacheTopologyInfo {
    pub fn from_cpuid(r: &CpuidResult) -> Option<Self> {
        // Cache type 0 terminates the enumeration
        if r.eax & 0x1F == 0 {
            return None;
        }

        Some(Self {
            level: (r.eax >> 5) & 0x7,
            num_ways: (r.ebx >> 22) + 1,
            num_partitions: ((r.ebx >> 12) & 0x3FF) + 1,
            line_size: (r.ebx & 0xFFF) + 1,
            num_sets: r.ecx + 1,
        })
    }

    pub fn way_size(&self) -> u64 {
        self.num_partitions as u64 * self.line_size as u64 * self.num_sets as u64
    }

    pub fn total_size(&self) -> u64 {
        self.way_size() * self.num_ways as u64
    }
}

/// Processor identification and socket layout, as seen by the RDT layer
pub trait Topology: Send + Sync {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult;

    /// Socket IDs, ascending
    fn sockets(&self) -> Vec<u32>;

    /// Logical cores of `socket`, ascending
    fn socket_cores(&self, socket: u32) -> Vec<u32>;

    fn vendor_signature(&self) -> VendorId {
        VendorId::from_signature(&cpuid::vendor_string(&self.cpuid(0, 0)))
    }

    /// Find the cache at `level` by walking the subleaves of `leaf_id`
    fn cache_topology_leaf(&self, leaf_id: u32, level: u32) -> Option<CacheTopologyInfo> {
        // Real parts report fewer than 8 caches; the bound guards bad input.
        (0..8)
            .map_while(|subleaf| CacheTopologyInfo::from_cpuid(&self.cpuid(leaf_id, subleaf)))
            .find(|info| info.level == level)
    }

    /// Core used to access per-socket registers
    fn socket_lcore(&self, socket: u32) -> Option<u32> {
        self.socket_cores(socket).first().copied()
    }
}

/// Topology of the running machine: `cpuid` plus sysfs package IDs
pub struct SysTopology {
    sockets: BTreeMap<u32, Vec<u32>>,
}

impl SysTopology {
    pub fn detect() -> Self {
        let cores = RdtConfig::detect_online_cpus();
        let mut sockets: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

        for core in cores {
            let socket = RdtConfig::read_socket_id(core).unwrap_or_else(|| {
                tracing::warn!("No package id for core {}, assuming socket 0", core);
                0
            });
            sockets.entry(socket).or_default().push(core);
        }

        for cores in sockets.values_mut() {
            cores.sort_unstable();
        }

        tracing::info!("Detected {} sockets", sockets.len());
        Self { sockets }
    }
}

impl Topology for SysTopology {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        cpuid::cpuid(leaf, subleaf)
    }

    fn sockets(&self) -> Vec<u32> {
        self.sockets.keys().copied().collect()
    }

    fn socket_cores(&self, socket: u32) -> Vec<u32> {
        self.sockets.get(&socket).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTopology;

    #[test]
    fn test_vendor_signature() {
        assert_eq!(FakeTopology::intel().vendor_signature(), VendorId::Intel);
        assert_eq!(FakeTopology::amd().vendor_signature(), VendorId::Amd);
        assert_eq!(
            FakeTopology::with_vendor("CyrixInstead").vendor_signature(),
            VendorId::Unknown("CyrixInstead".to_string())
        );
    }

    #[test]
    fn test_cache_topology_leaf() {
        let topo = FakeTopology::intel();
        let l3 = topo.cache_topology_leaf(0x4, 3).unwrap();
        assert_eq!(l3.num_ways, 11);
        assert_eq!(l3.line_size, 64);
        assert_eq!(l3.way_size(), 64 * 2048);
        assert!(topo.cache_topology_leaf(0x4, 4).is_none());
    }

    #[test]
    fn test_socket_lcore() {
        let topo = FakeTopology::intel();
        assert_eq!(topo.socket_lcore(1), Some(2));
        assert_eq!(topo.socket_lcore(7), None);
    }
}
