use std::io::Write;

use rdtctl_raw::rdt::cat::{CacheLevel, CacheMask};

use crate::alloc::{CacheAllocEntry, MbaEntry};
use crate::dispatch::{self, Backend};
use crate::error::{RdtError, Result};
use crate::hw;
use crate::init::{self, RdtState};
use crate::platform::Platform;
use crate::report::SocketAllocation;

/// Allocation operations bound to a published state and a platform
pub struct Rdt<'a> {
    state: &'a RdtState,
    platform: &'a Platform,
}

impl<'a> Rdt<'a> {
    pub fn new(state: &'a RdtState, platform: &'a Platform) -> Self {
        Self { state, platform }
    }

    /// Bind to the process-wide state
    pub fn current(platform: &'a Platform) -> Result<Self> {
        Ok(Self::new(init::state()?, platform))
    }

    pub fn state(&self) -> &RdtState {
        self.state
    }

    pub fn backend(&self) -> Backend {
        self.state.backend
    }

    pub fn get_mba(&self, socket: u32) -> Result<Vec<MbaEntry>> {
        let num_classes = self.state.profile.mba_info()?.num_classes;
        dispatch::get_bandwidth(
            &self.state.profile,
            self.state.backend,
            self.platform,
            socket,
            num_classes as usize,
        )
    }

    pub fn set_mba(&self, socket: u32, requested: &[MbaEntry]) -> Result<Vec<MbaEntry>> {
        dispatch::set_bandwidth(
            &self.state.profile,
            self.state.backend,
            self.platform,
            socket,
            requested,
        )
    }

    pub fn get_cat(&self, level: CacheLevel, socket: u32) -> Result<Vec<CacheAllocEntry>> {
        dispatch::get_cache_masks(
            &self.state.caps,
            self.state.backend,
            self.platform,
            level,
            socket,
        )
    }

    pub fn set_cat(
        &self,
        level: CacheLevel,
        socket: u32,
        requested: &[CacheAllocEntry],
    ) -> Result<Vec<CacheAllocEntry>> {
        dispatch::set_cache_masks(
            &self.state.caps,
            self.state.backend,
            self.platform,
            level,
            socket,
            requested,
        )
    }

    pub fn get_assoc(&self, lcore: u32) -> Result<u32> {
        dispatch::get_assoc(self.state.backend, self.platform, lcore)
    }

    pub fn set_assoc(&self, lcore: u32, class_id: u32) -> Result<()> {
        dispatch::set_assoc(
            &self.state.caps,
            self.state.backend,
            self.platform,
            lcore,
            class_id,
        )
    }

    fn cat_levels(&self) -> impl Iterator<Item = CacheLevel> + '_ {
        [CacheLevel::L3, CacheLevel::L2]
            .into_iter()
            .filter(|&level| self.state.caps.cat(level).info().is_some())
    }

    /// Full cache masks, default bandwidth and COS 0 everywhere
    ///
    /// `l3_cdp` switches L3 code and data prioritization first; that is
    /// only possible on the hardware path.
    pub fn reset(&self, l3_cdp: Option<bool>) -> Result<()> {
        let sockets = self.platform.topology.sockets();

        if let Some(enable) = l3_cdp {
            let supported = self
                .state
                .caps
                .l3ca
                .info()
                .is_some_and(|info| info.cdp_supported);
            if !supported {
                return Err(RdtError::FeatureNotSupported("L3 CDP"));
            }
            if self.state.backend == Backend::Os {
                return Err(RdtError::ConfigError(
                    "CDP is a resctrl mount option and cannot be changed at reset".to_string(),
                ));
            }
            for &socket in &sockets {
                let lcore = self.platform.socket_lcore(socket)?;
                hw::cat::set_cdp(self.platform.msr.as_ref(), lcore, CacheLevel::L3, enable)?;
            }
        }

        for &socket in &sockets {
            for level in self.cat_levels() {
                let num_ways = self
                    .state
                    .caps
                    .cat(level)
                    .info()
                    .map_or(1, |info| info.num_ways);
                let full = CacheMask::full(num_ways).bits();
                let requested: Vec<_> = self
                    .get_cat(level, socket)?
                    .iter()
                    .map(|entry| CacheAllocEntry::unified(entry.class_id, full))
                    .collect();
                self.set_cat(level, socket, &requested)?;
            }

            if self.state.caps.mba.info().is_some() {
                let default = self.state.profile.default_mba;
                let requested: Vec<_> = self
                    .get_mba(socket)?
                    .iter()
                    .map(|entry| MbaEntry::new(entry.class_id, default))
                    .collect();
                self.set_mba(socket, &requested)?;
            }

            for lcore in self.platform.topology.socket_cores(socket) {
                self.set_assoc(lcore, 0)?;
            }
        }

        tracing::info!("Allocation reset on {} sockets", sockets.len());
        Ok(())
    }

    /// Current allocation of every socket, for supported features only
    pub fn snapshot(&self) -> Result<Vec<SocketAllocation>> {
        let caps = &self.state.caps;

        self.platform
            .topology
            .sockets()
            .into_iter()
            .map(|socket| {
                let mut alloc = SocketAllocation {
                    socket,
                    ..Default::default()
                };
                if caps.l3ca.info().is_some() {
                    alloc.l3 = self.get_cat(CacheLevel::L3, socket)?;
                }
                if caps.l2ca.info().is_some() {
                    alloc.l2 = self.get_cat(CacheLevel::L2, socket)?;
                }
                if caps.mba.info().is_some() {
                    alloc.mba = self.get_mba(socket)?;
                }
                Ok(alloc)
            })
            .collect()
    }

    pub fn print_config(&self, sink: &mut dyn Write, verbose: bool) -> Result<()> {
        let sockets = self.snapshot()?;
        self.state.profile.alloc_print_config(
            sink,
            &self.state.caps,
            self.state.backend,
            &sockets,
            verbose,
        )
    }
}
