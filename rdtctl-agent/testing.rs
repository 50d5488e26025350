//! In-memory collaborators for unit tests

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::common::cpuid::vendor_leaf;
use crate::common::{CpuidResult, MsrAccess, MsrError, Topology};
use crate::os::Resctrl;
use crate::platform::Platform;
use crate::vendor::{Vendor, VendorProfile};

fn regs(eax: u32, ebx: u32, ecx: u32, edx: u32) -> CpuidResult {
    CpuidResult { eax, ebx, ecx, edx }
}

/// Cache leaf entry: data/unified cache of `level`
fn cache(level: u32, ways: u32, sets: u32) -> CpuidResult {
    let cache_type = if level == 1 { 1 } else { 3 };
    regs(cache_type | (level << 5), ((ways - 1) << 22) | 63, sets - 1, 0)
}

/// Two sockets with two cores each: `{0: [0, 1], 1: [2, 3]}`
pub struct FakeTopology {
    cpuid: HashMap<(u32, u32), CpuidResult>,
    sockets: BTreeMap<u32, Vec<u32>>,
}

impl FakeTopology {
    fn with_leaves(leaves: Vec<((u32, u32), CpuidResult)>) -> Self {
        Self {
            cpuid: leaves.into_iter().collect(),
            sockets: BTreeMap::from([(0, vec![0, 1]), (1, vec![2, 3])]),
        }
    }

    /// L3 CAT (16 COS, 11 ways, CDP), L2 CAT (8 COS, 8 ways), MBA (8 COS,
    /// step 10) and CMT/MBM (RMID 0..=143)
    pub fn intel() -> Self {
        let pqe_pqm = (1 << 15) | (1 << 12);
        Self::with_leaves(vec![
            ((0, 0), vendor_leaf("GenuineIntel")),
            ((0x7, 0), regs(0, pqe_pqm, 0, 0)),
            ((0x10, 0), regs(0, (1 << 1) | (1 << 2) | (1 << 3), 0, 0)),
            ((0x10, 1), regs(10, 0, 1 << 2, 15)),
            ((0x10, 2), regs(7, 0, 0, 7)),
            ((0x10, 3), regs(89, 0, 1 << 2, 7)),
            ((0x4, 0), cache(1, 12, 64)),
            ((0x4, 1), regs(2 | (1 << 5), (7 << 22) | 63, 63, 0)),
            ((0x4, 2), cache(2, 16, 2048)),
            ((0x4, 3), cache(3, 11, 2048)),
            ((0xF, 0), regs(0, 143, 0, 1 << 1)),
            ((0xF, 1), regs(0, 65536, 143, 0b111)),
            ((0x8000_0000, 0), regs(0x8000_0008, 0, 0, 0)),
        ])
    }

    /// L3 CAT (16 COS, 16 ways), bandwidth enforcement (16 COS), no L2 CAT
    pub fn amd() -> Self {
        let pqe_pqm = (1 << 15) | (1 << 12);
        Self::with_leaves(vec![
            ((0, 0), vendor_leaf("AuthenticAMD")),
            ((0x7, 0), regs(0, pqe_pqm, 0, 0)),
            ((0x10, 0), regs(0, 1 << 1, 0, 0)),
            ((0x10, 1), regs(15, 0, 0, 15)),
            ((0x8000_0000, 0), regs(0x8000_0028, 0, 0, 0)),
            ((0x8000_0020, 0), regs(0, 1 << 1, 0, 0)),
            ((0x8000_0020, 1), regs(0, 0, 0, 15)),
            ((0x8000_001D, 0), cache(1, 8, 64)),
            ((0x8000_001D, 1), cache(2, 8, 1024)),
            ((0x8000_001D, 2), cache(3, 16, 32768)),
            ((0xF, 0), regs(0, 255, 0, 1 << 1)),
            ((0xF, 1), regs(0, 64, 255, 0b111)),
        ])
    }

    /// Intel feature leaves behind another vendor signature
    pub fn with_vendor(vendor: &str) -> Self {
        Self::intel().set_cpuid(0, 0, vendor_leaf(vendor))
    }

    pub fn set_cpuid(mut self, leaf: u32, subleaf: u32, result: CpuidResult) -> Self {
        self.cpuid.insert((leaf, subleaf), result);
        self
    }
}

impl Topology for FakeTopology {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        self.cpuid
            .get(&(leaf, subleaf))
            .copied()
            .unwrap_or_default()
    }

    fn sockets(&self) -> Vec<u32> {
        self.sockets.keys().copied().collect()
    }

    fn socket_cores(&self, socket: u32) -> Vec<u32> {
        self.sockets.get(&socket).cloned().unwrap_or_default()
    }
}

type WriteFilter = Box<dyn Fn(u32, u64) -> u64 + Send + Sync>;

/// MSR file backed by a map; unknown registers read as zero
#[derive(Default)]
pub struct FakeMsr {
    regs: Mutex<HashMap<(u32, u32), u64>>,
    writes: Mutex<Vec<(u32, u32, u64)>>,
    failing: Option<u32>,
    filter: Option<WriteFilter>,
}

impl FakeMsr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every access to `reg` fails
    pub fn failing_on(mut self, reg: u32) -> Self {
        self.failing = Some(reg);
        self
    }

    /// Transform values on write, as hardware that quantizes would
    pub fn with_write_filter(
        mut self,
        f: impl Fn(u32, u64) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(f));
        self
    }

    pub fn set(&self, lcore: u32, reg: u32, value: u64) {
        self.regs.lock().insert((lcore, reg), value);
    }

    pub fn get(&self, lcore: u32, reg: u32) -> u64 {
        self.regs.lock().get(&(lcore, reg)).copied().unwrap_or(0)
    }

    /// `(lcore, reg, value)` of every write, in order
    pub fn writes(&self) -> Vec<(u32, u32, u64)> {
        self.writes.lock().clone()
    }

    fn denied() -> std::io::Error {
        std::io::Error::from(std::io::ErrorKind::PermissionDenied)
    }
}

impl MsrAccess for FakeMsr {
    fn read(&self, lcore: u32, reg: u32) -> Result<u64, MsrError> {
        if self.failing == Some(reg) {
            return Err(MsrError::ReadFailed {
                cpu: lcore,
                msr: reg,
                source: Self::denied(),
            });
        }
        Ok(self.get(lcore, reg))
    }

    fn write(&self, lcore: u32, reg: u32, value: u64) -> Result<(), MsrError> {
        if self.failing == Some(reg) {
            return Err(MsrError::WriteFailed {
                cpu: lcore,
                msr: reg,
                source: Self::denied(),
            });
        }
        let value = self.filter.as_ref().map_or(value, |f| f(reg, value));
        self.writes.lock().push((lcore, reg, value));
        self.set(lcore, reg, value);
        Ok(())
    }
}

/// A resctrl mount in a temporary directory: root group plus `COS1..groups`
pub struct ResctrlTree {
    dir: tempfile::TempDir,
}

impl ResctrlTree {
    pub fn new(schemata: &str, groups: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("info")).unwrap();

        let tree = Self { dir };
        for class_id in 0..groups {
            let group = tree.group(class_id);
            if class_id > 0 {
                fs::create_dir(&group).unwrap();
            }
            fs::write(group.join("schemata"), schemata).unwrap();
            fs::write(group.join("cpus_list"), "\n").unwrap();
        }
        tree
    }

    fn group(&self, class_id: u32) -> std::path::PathBuf {
        if class_id == 0 {
            self.path().to_path_buf()
        } else {
            self.path().join(format!("COS{class_id}"))
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn resctrl(&self) -> Resctrl {
        Resctrl::new(self.path())
    }

    pub fn schemata(&self, class_id: u32) -> String {
        fs::read_to_string(self.group(class_id).join("schemata")).unwrap()
    }

    pub fn cpus(&self, class_id: u32) -> String {
        fs::read_to_string(self.group(class_id).join("cpus_list"))
            .unwrap()
            .trim()
            .to_string()
    }
}

/// Platform whose resctrl is not mounted
pub fn hw_platform(topology: FakeTopology) -> (Platform, Arc<FakeMsr>) {
    let msr = Arc::new(FakeMsr::new());
    let platform = Platform::new(
        Arc::new(topology),
        msr.clone(),
        Arc::new(Resctrl::new("/nonexistent/rdtctl-test-resctrl")),
    );
    (platform, msr)
}

pub fn os_platform_with_msr(
    topology: FakeTopology,
    tree: &ResctrlTree,
) -> (Platform, Arc<FakeMsr>) {
    let msr = Arc::new(FakeMsr::new());
    let platform = Platform::new(Arc::new(topology), msr.clone(), Arc::new(tree.resctrl()));
    (platform, msr)
}

pub fn os_platform(topology: FakeTopology, tree: &ResctrlTree) -> Platform {
    os_platform_with_msr(topology, tree).0
}

pub fn intel_profile() -> VendorProfile {
    let profile = VendorProfile::new(Vendor::Intel);
    let mba = profile.discover_alloc_mba(&FakeTopology::intel());
    profile.with_bandwidth_capability(mba)
}

pub fn amd_profile() -> VendorProfile {
    let profile = VendorProfile::new(Vendor::Amd);
    let mba = profile.discover_alloc_mba(&FakeTopology::amd());
    profile.with_bandwidth_capability(mba)
}
