// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod alloc;
pub mod capability;
pub mod common;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hw;
pub mod init;
pub mod monitor;
pub mod os;
pub mod platform;
pub mod prom;
pub mod rdt;
pub mod report;
pub mod translate;
pub mod vendor;

#[cfg(test)]
pub(crate) mod testing;

pub use alloc::{CacheAllocEntry, CacheAllocMask, MbaEntry};
pub use capability::Capabilities;
pub use config::{Interface, RdtConfig};
pub use dispatch::Backend;
pub use error::{RdtError, Result};
pub use init::RdtState;
pub use monitor::RdtMonitor;
pub use platform::Platform;
pub use prom::RdtMetricExporter;
pub use rdt::Rdt;
pub use vendor::{Vendor, VendorProfile};

pub use rdtctl_raw::rdt::cat::CacheLevel;
