// Allocation entries exchanged with the dispatch layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RdtError;

/// Bandwidth available to one class of service, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbaEntry {
    pub class_id: u32,
    pub mb_max: u32,
}

impl MbaEntry {
    pub fn new(class_id: u32, mb_max: u32) -> Self {
        Self { class_id, mb_max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheAllocMask {
    /// One mask for code and data
    Unified(u64),
    /// Separate masks with code and data prioritization enabled
    Cdp { code: u64, data: u64 },
}

impl CacheAllocMask {
    pub fn code(&self) -> u64 {
        match *self {
            CacheAllocMask::Unified(mask) => mask,
            CacheAllocMask::Cdp { code, .. } => code,
        }
    }

    pub fn data(&self) -> u64 {
        match *self {
            CacheAllocMask::Unified(mask) => mask,
            CacheAllocMask::Cdp { data, .. } => data,
        }
    }
}

impl fmt::Display for CacheAllocMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheAllocMask::Unified(mask) => write!(f, "{mask:#x}"),
            CacheAllocMask::Cdp { code, data } => write!(f, "code {code:#x} data {data:#x}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheAllocEntry {
    pub class_id: u32,
    pub mask: CacheAllocMask,
}

impl CacheAllocEntry {
    pub fn unified(class_id: u32, mask: u64) -> Self {
        Self {
            class_id,
            mask: CacheAllocMask::Unified(mask),
        }
    }

    pub fn cdp(class_id: u32, code: u64, data: u64) -> Self {
        Self {
            class_id,
            mask: CacheAllocMask::Cdp { code, data },
        }
    }
}

fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn split_class(s: &str) -> Result<(u32, &str), RdtError> {
    let (class_id, value) = s
        .split_once('=')
        .ok_or_else(|| RdtError::ConfigError(format!("expected CLASS=VALUE, got '{s}'")))?;
    let class_id = class_id
        .trim()
        .parse()
        .map_err(|_| RdtError::ConfigError(format!("invalid class of service '{class_id}'")))?;
    Ok((class_id, value))
}

/// `CLASS=PERCENT`, e.g. `3=50`
impl FromStr for MbaEntry {
    type Err = RdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class_id, value) = split_class(s)?;
        let mb_max = value
            .trim()
            .trim_end_matches('%')
            .parse()
            .map_err(|_| RdtError::ConfigError(format!("invalid percentage '{value}'")))?;
        Ok(Self::new(class_id, mb_max))
    }
}

/// `CLASS=MASK` or `CLASS=CODE,DATA`; masks are hex with `0x` or decimal
impl FromStr for CacheAllocEntry {
    type Err = RdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class_id, value) = split_class(s)?;
        let mask = |m: &str| {
            parse_u64(m).ok_or_else(|| RdtError::ConfigError(format!("invalid cache mask '{m}'")))
        };
        match value.split_once(',') {
            Some((code, data)) => Ok(Self::cdp(class_id, mask(code)?, mask(data)?)),
            None => Ok(Self::unified(class_id, mask(value)?)),
        }
    }
}
