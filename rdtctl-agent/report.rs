// Human-readable configuration report

use serde::Serialize;
use std::io::Write;

use crate::alloc::{CacheAllocEntry, MbaEntry};
use crate::capability::{BandwidthCapability, Capabilities, CatCapability, MonCapability};
use crate::dispatch::Backend;
use crate::error::Result;
use crate::vendor::VendorProfile;

/// Allocation state of one socket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocketAllocation {
    pub socket: u32,
    pub l3: Vec<CacheAllocEntry>,
    pub l2: Vec<CacheAllocEntry>,
    pub mba: Vec<MbaEntry>,
}

pub type MbaFormatter = fn(&VendorProfile, &MbaEntry) -> String;

fn write_cat(sink: &mut dyn Write, name: &str, cap: &CatCapability) -> std::io::Result<()> {
    match cap.info() {
        Some(info) => writeln!(
            sink,
            "{name} CAT: {} classes, {} ways of {} KiB, CDP {}",
            info.num_classes,
            info.num_ways,
            info.way_size / 1024,
            if info.cdp_supported {
                "supported"
            } else {
                "not supported"
            }
        ),
        None => writeln!(sink, "{name} CAT: not supported"),
    }
}

pub fn print_config(
    sink: &mut dyn Write,
    profile: &VendorProfile,
    caps: &Capabilities,
    backend: Backend,
    sockets: &[SocketAllocation],
    verbose: bool,
    format_mba: MbaFormatter,
) -> Result<()> {
    writeln!(sink, "Vendor: {}", profile.vendor.name())?;
    writeln!(sink, "Interface: {backend}")?;

    write_cat(sink, "L3", &caps.l3ca)?;
    write_cat(sink, "L2", &caps.l2ca)?;

    match &caps.mba {
        BandwidthCapability::Supported(info) => writeln!(
            sink,
            "MBA: {} classes, granularity {}%, throttle max {}%{}",
            info.num_classes,
            profile.mba_granularity,
            profile.mba_throttle_max,
            if info.is_linear { ", linear" } else { "" }
        )?,
        BandwidthCapability::NotSupported => writeln!(sink, "MBA: not supported")?,
    }

    match &caps.mon {
        MonCapability::Supported(info) => writeln!(
            sink,
            "Monitoring: max RMID {}, {}-bit counters, scale {} bytes",
            info.max_rmid, info.counter_width, info.scale_factor
        )?,
        MonCapability::NotSupported => writeln!(sink, "Monitoring: not supported")?,
    }

    if verbose {
        writeln!(
            sink,
            "MBA register base {:#x}, native max {:#x}, default {}%",
            profile.mba_msr_reg, profile.mba_max, profile.default_mba
        )?;
        writeln!(sink, "Cache topology leaf {:#x}", profile.cpuid_cache_leaf)?;
    }

    for socket in sockets {
        writeln!(sink, "Socket {}:", socket.socket)?;
        for entry in &socket.l3 {
            writeln!(sink, "    L3CA COS{} => {}", entry.class_id, entry.mask)?;
        }
        for entry in &socket.l2 {
            writeln!(sink, "    L2CA COS{} => {}", entry.class_id, entry.mask)?;
        }
        for entry in &socket.mba {
            writeln!(sink, "    {}", format_mba(profile, entry))?;
        }
    }

    Ok(())
}
