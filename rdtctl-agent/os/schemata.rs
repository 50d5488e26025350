//! resctrl `schemata` file format
//!
//! One line per resource, e.g.
//!
//! ```text
//!     L3:0=7ff;1=7ff
//!     MB:0=100;1=100
//! ```
//!
//! Bandwidth resources (`MB`, `SMBA`) are decimal; everything else is a hex
//! bitmask. The kernel pads resource names with leading spaces.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schemata {
    lines: Vec<(String, BTreeMap<u32, u64>)>,
}

fn is_decimal(resource: &str) -> bool {
    matches!(resource, "MB" | "SMBA")
}

impl Schemata {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut lines = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (resource, domains) = line
                .split_once(':')
                .ok_or_else(|| format!("missing ':' in '{line}'"))?;
            let resource = resource.trim().to_string();
            let radix = if is_decimal(&resource) { 10 } else { 16 };

            let mut values = BTreeMap::new();
            for domain in domains.split(';').map(str::trim).filter(|d| !d.is_empty()) {
                let (id, value) = domain
                    .split_once('=')
                    .ok_or_else(|| format!("missing '=' in '{domain}'"))?;
                let id: u32 = id
                    .trim()
                    .parse()
                    .map_err(|e| format!("bad domain id '{id}': {e}"))?;
                let value = u64::from_str_radix(value.trim(), radix)
                    .map_err(|e| format!("bad {resource} value '{value}': {e}"))?;
                values.insert(id, value);
            }

            lines.push((resource, values));
        }

        Ok(Self { lines })
    }

    pub fn get(&self, resource: &str, domain: u32) -> Option<u64> {
        self.lines
            .iter()
            .find(|(name, _)| name == resource)
            .and_then(|(_, values)| values.get(&domain).copied())
    }

    /// Replace an existing value; returns false when resource or domain is absent
    pub fn set(&mut self, resource: &str, domain: u32, value: u64) -> bool {
        self.lines
            .iter_mut()
            .find(|(name, _)| name == resource)
            .and_then(|(_, values)| values.get_mut(&domain))
            .map(|slot| *slot = value)
            .is_some()
    }

    pub fn has_resource(&self, resource: &str) -> bool {
        self.lines.iter().any(|(name, _)| name == resource)
    }
}

impl fmt::Display for Schemata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (resource, values) in &self.lines {
            write!(f, "{resource}:")?;
            for (i, (domain, value)) in values.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                if is_decimal(resource) {
                    write!(f, "{domain}={value}")?;
                } else {
                    write!(f, "{domain}={value:x}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
