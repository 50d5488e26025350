//! OS path: the Linux resctrl filesystem
//!
//! Class of service `n` maps to the resctrl group `COS{n}`; COS 0 is the
//! root group. Values cross this interface in resctrl's own units (percent
//! or vendor units for `MB`, hex bitmasks for caches). Translating them is
//! left to the vendor profile.

pub mod resctrl;
pub mod schemata;

use std::path::PathBuf;

use rdtctl_raw::rdt::cat::{CacheLevel, CdpSlot};

pub use resctrl::Resctrl;
pub use schemata::Schemata;

#[derive(Debug, thiserror::Error)]
pub enum ResctrlError {
    #[error("resctrl is not mounted at {0}")]
    NotMounted(PathBuf),

    #[error("resctrl I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed resctrl file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("resctrl group for COS {0} does not exist")]
    GroupMissing(u32),

    #[error("COS {class_id} has no {resource} value for domain {socket}")]
    ValueMissing {
        class_id: u32,
        resource: String,
        socket: u32,
    },

    #[error("resctrl does not support {0}")]
    Unsupported(String),
}

/// One schemata value of one class on one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemataValue {
    pub class_id: u32,
    pub value: u64,
}

impl SchemataValue {
    pub fn new(class_id: u32, value: u64) -> Self {
        Self { class_id, value }
    }
}

/// Schemata resource name of a cache level, e.g. `L3` or `L3CODE`
pub fn cache_resource(level: CacheLevel, slot: Option<CdpSlot>) -> String {
    match slot {
        None => level.name().to_string(),
        Some(CdpSlot::Code) => format!("{level}CODE"),
        Some(CdpSlot::Data) => format!("{level}DATA"),
    }
}

pub const MB_RESOURCE: &str = "MB";

/// The OS-mediated resource control interface
///
/// Implementors provide raw schemata access and core association; the
/// bandwidth and cache operations are derived from it. Failures are
/// reported as [`ResctrlError`] and are never retried.
pub trait ResctrlInterface: Send + Sync {
    fn is_available(&self) -> bool;

    /// Whether the mount has code and data prioritization on `level`
    fn cdp_enabled(&self, level: CacheLevel) -> Result<bool, ResctrlError>;

    /// Values of `resource` on `socket` for the first `max_classes` groups
    fn read_schemata(
        &self,
        resource: &str,
        socket: u32,
        max_classes: usize,
    ) -> Result<Vec<SchemataValue>, ResctrlError>;

    /// Write values of `resource` on `socket` and return them as re-read
    fn write_schemata(
        &self,
        resource: &str,
        socket: u32,
        values: &[SchemataValue],
    ) -> Result<Vec<SchemataValue>, ResctrlError>;

    /// Class of service `lcore` belongs to
    fn os_get_assoc(&self, lcore: u32) -> Result<u32, ResctrlError>;

    fn os_set_assoc(&self, lcore: u32, class_id: u32) -> Result<(), ResctrlError>;

    fn os_get_bandwidth(
        &self,
        socket: u32,
        max_classes: usize,
    ) -> Result<Vec<SchemataValue>, ResctrlError> {
        self.read_schemata(MB_RESOURCE, socket, max_classes)
    }

    fn os_set_bandwidth(
        &self,
        socket: u32,
        requested: &[SchemataValue],
    ) -> Result<Vec<SchemataValue>, ResctrlError> {
        self.write_schemata(MB_RESOURCE, socket, requested)
    }

    fn os_get_cache_masks(
        &self,
        level: CacheLevel,
        slot: Option<CdpSlot>,
        socket: u32,
        max_classes: usize,
    ) -> Result<Vec<SchemataValue>, ResctrlError> {
        self.read_schemata(&cache_resource(level, slot), socket, max_classes)
    }

    fn os_set_cache_masks(
        &self,
        level: CacheLevel,
        slot: Option<CdpSlot>,
        socket: u32,
        masks: &[SchemataValue],
    ) -> Result<Vec<SchemataValue>, ResctrlError> {
        self.write_schemata(&cache_resource(level, slot), socket, masks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_resource_names() {
        assert_eq!(cache_resource(CacheLevel::L3, None), "L3");
        assert_eq!(cache_resource(CacheLevel::L2, Some(CdpSlot::Code)), "L2CODE");
        assert_eq!(cache_resource(CacheLevel::L3, Some(CdpSlot::Data)), "L3DATA");
    }
}
