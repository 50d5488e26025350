pub mod affinity;
pub mod cpuid;
pub mod msr;
pub mod topology;

pub use affinity::AffinityGuard;
pub use cpuid::CpuidResult;
pub use msr::{MsrAccess, MsrDevice, MsrError};
pub use topology::{CacheTopologyInfo, SysTopology, Topology, VendorId};
