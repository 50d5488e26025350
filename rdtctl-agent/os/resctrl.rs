use std::fs;
use std::path::{Path, PathBuf};

use rdtctl_raw::rdt::cat::CacheLevel;

use crate::config::RdtConfig;
use crate::os::{ResctrlError, ResctrlInterface, Schemata, SchemataValue};

/// Client for a mounted resctrl filesystem
pub struct Resctrl {
    root: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ResctrlError + '_ {
    move |source| ResctrlError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Render a sorted CPU list as `0-3,8`
pub fn format_cpu_list(cpus: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut iter = cpus.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }

    parts.join(",")
}

impl Resctrl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_dir(&self, class_id: u32) -> PathBuf {
        if class_id == 0 {
            self.root.clone()
        } else {
            self.root.join(format!("COS{class_id}"))
        }
    }

    fn existing_group(&self, class_id: u32) -> Result<PathBuf, ResctrlError> {
        let dir = self.group_dir(class_id);
        if dir.join("schemata").is_file() {
            Ok(dir)
        } else {
            Err(ResctrlError::GroupMissing(class_id))
        }
    }

    fn ensure_mounted(&self) -> Result<(), ResctrlError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ResctrlError::NotMounted(self.root.clone()))
        }
    }

    /// Create `COS1..num_classes` so that every class has a group
    pub fn prepare_groups(&self, num_classes: u32) -> Result<(), ResctrlError> {
        self.ensure_mounted()?;
        for class_id in 1..num_classes {
            let dir = self.group_dir(class_id);
            if !dir.is_dir() {
                fs::create_dir(&dir).map_err(io_error(&dir))?;
                tracing::info!("Created resctrl group {}", dir.display());
            }
        }
        Ok(())
    }

    fn read_group_schemata(&self, dir: &Path) -> Result<Schemata, ResctrlError> {
        let path = dir.join("schemata");
        let text = fs::read_to_string(&path).map_err(io_error(&path))?;
        Schemata::parse(&text).map_err(|detail| ResctrlError::Parse { path, detail })
    }

    fn read_cpus(&self, dir: &Path) -> Result<Vec<u32>, ResctrlError> {
        let path = dir.join("cpus_list");
        let text = fs::read_to_string(&path).map_err(io_error(&path))?;
        RdtConfig::parse_cpu_list(&text).ok_or_else(|| ResctrlError::Parse {
            detail: format!("bad cpu list '{}'", text.trim()),
            path,
        })
    }

    fn write_cpus(&self, dir: &Path, cpus: &[u32]) -> Result<(), ResctrlError> {
        let path = dir.join("cpus_list");
        fs::write(&path, format!("{}\n", format_cpu_list(cpus))).map_err(io_error(&path))
    }

    /// `COS{n}` groups present under the root, ascending
    fn groups(&self) -> Result<Vec<u32>, ResctrlError> {
        let entries = fs::read_dir(&self.root).map_err(io_error(&self.root))?;
        let mut ids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("COS"))
                    .and_then(|id| id.parse().ok())
            })
            .filter(|&id| id != 0)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

impl ResctrlInterface for Resctrl {
    fn is_available(&self) -> bool {
        self.root.join("info").is_dir() && self.root.join("schemata").is_file()
    }

    fn cdp_enabled(&self, level: CacheLevel) -> Result<bool, ResctrlError> {
        self.ensure_mounted()?;
        Ok(self.root.join("info").join(format!("{level}CODE")).is_dir())
    }

    fn read_schemata(
        &self,
        resource: &str,
        socket: u32,
        max_classes: usize,
    ) -> Result<Vec<SchemataValue>, ResctrlError> {
        self.ensure_mounted()?;
        let mut values = Vec::new();

        for class_id in 0..max_classes as u32 {
            let dir = match self.existing_group(class_id) {
                Ok(dir) => dir,
                Err(ResctrlError::GroupMissing(_)) if class_id > 0 => break,
                Err(e) => return Err(e),
            };
            let value = self
                .read_group_schemata(&dir)?
                .get(resource, socket)
                .ok_or_else(|| ResctrlError::ValueMissing {
                    class_id,
                    resource: resource.to_string(),
                    socket,
                })?;
            values.push(SchemataValue::new(class_id, value));
        }

        Ok(values)
    }

    fn write_schemata(
        &self,
        resource: &str,
        socket: u32,
        values: &[SchemataValue],
    ) -> Result<Vec<SchemataValue>, ResctrlError> {
        self.ensure_mounted()?;

        let mut committed = Vec::with_capacity(values.len());
        for entry in values {
            let dir = self.existing_group(entry.class_id)?;
            let mut schemata = self.read_group_schemata(&dir)?;
            if !schemata.set(resource, socket, entry.value) {
                return Err(ResctrlError::ValueMissing {
                    class_id: entry.class_id,
                    resource: resource.to_string(),
                    socket,
                });
            }

            let path = dir.join("schemata");
            fs::write(&path, schemata.to_string()).map_err(io_error(&path))?;

            let value = self
                .read_group_schemata(&dir)?
                .get(resource, socket)
                .ok_or_else(|| ResctrlError::ValueMissing {
                    class_id: entry.class_id,
                    resource: resource.to_string(),
                    socket,
                })?;
            committed.push(SchemataValue::new(entry.class_id, value));
        }

        Ok(committed)
    }

    fn os_get_assoc(&self, lcore: u32) -> Result<u32, ResctrlError> {
        self.ensure_mounted()?;
        for class_id in self.groups()? {
            let dir = self.group_dir(class_id);
            if self.read_cpus(&dir)?.contains(&lcore) {
                return Ok(class_id);
            }
        }
        Ok(0)
    }

    fn os_set_assoc(&self, lcore: u32, class_id: u32) -> Result<(), ResctrlError> {
        self.ensure_mounted()?;
        let target = self.existing_group(class_id)?;

        // Cores removed from a group fall back to the root group
        for other in self.groups()? {
            if other == class_id {
                continue;
            }
            let dir = self.group_dir(other);
            let mut cpus = self.read_cpus(&dir)?;
            if let Some(pos) = cpus.iter().position(|&c| c == lcore) {
                cpus.remove(pos);
                self.write_cpus(&dir, &cpus)?;
            }
        }

        if class_id != 0 {
            let mut cpus = self.read_cpus(&target)?;
            if !cpus.contains(&lcore) {
                cpus.push(lcore);
                cpus.sort_unstable();
                self.write_cpus(&target, &cpus)?;
            }
        }

        tracing::debug!("Core {} moved to resctrl group COS{}", lcore, class_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ResctrlTree;

    #[test]
    fn test_format_cpu_list() {
        assert_eq!(format_cpu_list(&[0, 1, 2, 3, 8, 10, 11]), "0-3,8,10-11");
        assert_eq!(format_cpu_list(&[]), "");
    }

    #[test]
    fn test_not_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let resctrl = Resctrl::new(dir.path());
        assert!(!resctrl.is_available());
        assert!(matches!(
            resctrl.read_schemata("MB", 0, 4),
            Err(ResctrlError::NotMounted(_))
        ));
    }

    #[test]
    fn test_read_stops_at_missing_group() {
        let tree = ResctrlTree::new("L3:0=7ff;1=7ff\nMB:0=100;1=100\n", 2);
        let values = tree.resctrl().read_schemata("MB", 1, 8).unwrap();
        assert_eq!(
            values,
            vec![SchemataValue::new(0, 100), SchemataValue::new(1, 100)]
        );
    }

    #[test]
    fn test_write_merges_domain() {
        let tree = ResctrlTree::new("L3:0=7ff;1=7ff\nMB:0=100;1=100\n", 2);
        let resctrl = tree.resctrl();

        let committed = resctrl
            .write_schemata("L3", 1, &[SchemataValue::new(1, 0xf)])
            .unwrap();
        assert_eq!(committed, vec![SchemataValue::new(1, 0xf)]);
        assert_eq!(
            tree.schemata(1),
            "L3:0=7ff;1=f\nMB:0=100;1=100\n".to_string()
        );
        assert_eq!(resctrl.read_schemata("L3", 0, 1).unwrap()[0].value, 0x7ff);
    }

    #[test]
    fn test_write_missing_group_or_value() {
        let tree = ResctrlTree::new("MB:0=100\n", 2);
        let resctrl = tree.resctrl();
        assert!(matches!(
            resctrl.write_schemata("MB", 0, &[SchemataValue::new(5, 50)]),
            Err(ResctrlError::GroupMissing(5))
        ));
        assert!(matches!(
            resctrl.write_schemata("MB", 3, &[SchemataValue::new(1, 50)]),
            Err(ResctrlError::ValueMissing { socket: 3, .. })
        ));
    }

    #[test]
    fn test_assoc_moves_between_groups() {
        let tree = ResctrlTree::new("MB:0=100\n", 3);
        let resctrl = tree.resctrl();

        assert_eq!(resctrl.os_get_assoc(4).unwrap(), 0);
        resctrl.os_set_assoc(4, 2).unwrap();
        assert_eq!(resctrl.os_get_assoc(4).unwrap(), 2);
        resctrl.os_set_assoc(4, 1).unwrap();
        assert_eq!(resctrl.os_get_assoc(4).unwrap(), 1);
        assert_eq!(tree.cpus(2), "");
        resctrl.os_set_assoc(4, 0).unwrap();
        assert_eq!(resctrl.os_get_assoc(4).unwrap(), 0);
    }

    #[test]
    fn test_prepare_groups() {
        let tree = ResctrlTree::new("MB:0=100\n", 1);
        tree.resctrl().prepare_groups(3).unwrap();
        assert!(tree.path().join("COS2").is_dir());
    }
}
