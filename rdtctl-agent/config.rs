use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

pub const DEFAULT_RESCTRL_PATH: &str = "/sys/fs/resctrl";

/// Requested control interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    /// OS interface when resctrl is mounted, MSRs otherwise
    #[default]
    Auto,
    /// Program model specific registers directly
    Msr,
    /// Go through the resctrl filesystem
    Os,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdtConfig {
    pub interface: Interface,
    pub resctrl_path: PathBuf,
    pub sockets: Vec<u32>,
    pub cores: Vec<u32>,
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self {
            interface: Interface::Auto,
            resctrl_path: PathBuf::from(DEFAULT_RESCTRL_PATH),
            sockets: Vec::new(),
            cores: Vec::new(),
        }
    }
}

impl RdtConfig {
    pub fn new(interface: Interface, sockets: Vec<u32>, cores: Vec<u32>) -> Self {
        Self {
            interface,
            sockets,
            cores,
            ..Self::default()
        }
    }

    /// All online CPUs and the sockets they belong to
    pub fn auto_detect(interface: Interface) -> Self {
        let cores = Self::detect_online_cpus();
        let sockets = Self::detect_sockets(&cores);

        tracing::info!(
            "Auto-detected {} sockets, {} cores",
            sockets.len(),
            cores.len()
        );

        Self::new(interface, sockets, cores)
    }

    pub fn with_resctrl_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.resctrl_path = path.into();
        self
    }

    /// Detect online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus() -> Vec<u32> {
        std::fs::read_to_string("/sys/devices/system/cpu/online")
            .ok()
            .and_then(|s| Self::parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, using default: 0");
                vec![0]
            })
    }

    /// Parse CPU list like "0-3,8-11" into a sorted, deduplicated Vec
    pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
        let mut cpus = BTreeSet::new();
        for part in s.trim().split(',').map(str::trim) {
            if part.is_empty() {
                continue;
            }
            if let Some((start, end)) = part.split_once('-') {
                let start: u32 = start.trim().parse().ok()?;
                let end: u32 = end.trim().parse().ok()?;
                if start > end {
                    return None;
                }
                cpus.extend(start..=end);
            } else {
                cpus.insert(part.parse().ok()?);
            }
        }
        Some(cpus.into_iter().collect())
    }

    pub fn read_socket_id(core: u32) -> Option<u32> {
        let path = format!("/sys/devices/system/cpu/cpu{core}/topology/physical_package_id");
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    /// Detect which sockets the cores belong to
    pub fn detect_sockets(cores: &[u32]) -> Vec<u32> {
        let sockets: BTreeSet<u32> = cores
            .iter()
            .filter_map(|&core| Self::read_socket_id(core))
            .collect();

        if sockets.is_empty() {
            return vec![0];
        }

        sockets.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(
            RdtConfig::parse_cpu_list("0-3,8-9\n"),
            Some(vec![0, 1, 2, 3, 8, 9])
        );
        assert_eq!(RdtConfig::parse_cpu_list("5, 2,2"), Some(vec![2, 5]));
        assert_eq!(RdtConfig::parse_cpu_list("3-1"), None);
        assert_eq!(RdtConfig::parse_cpu_list("a-b"), None);
    }

    #[test]
    fn test_interface_serde() {
        let json = serde_json::to_string(&Interface::Os).unwrap();
        assert_eq!(json, "\"os\"");
        assert_eq!(Interface::default(), Interface::Auto);
    }
}
