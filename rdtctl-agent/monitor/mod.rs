//! Cache and memory bandwidth monitoring (CMT / MBM)
//!
//! Each monitored core gets its own RMID. Counters are selected and read
//! through the first core of the socket the monitored core lives on.
//! Monitoring always programs MSRs directly, whatever the allocation
//! backend.

pub mod types;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rdtctl_raw::rdt::mon::CounterReading;

use crate::capability::MonInfo;
use crate::common::{MsrAccess, Topology};
use crate::error::{RdtError, Result};
use crate::hw;

pub use types::{MonEvent, RdtMetric};

#[derive(Debug, Clone, Default)]
struct CoreCounters {
    rmid: u32,
    socket: u32,
    prev: HashMap<MonEvent, u64>,
    llc_occupancy: u64,
    total_bw: f64,
    local_bw: f64,
}

pub struct RdtMonitor {
    msr: Arc<dyn MsrAccess>,
    info: MonInfo,
    cores: BTreeMap<u32, CoreCounters>,
    socket_lcores: BTreeMap<u32, u32>,
    rmid_used: Vec<bool>,
}

/// Bytes counted between two MBM readings of a `width`-bit counter
pub fn counter_delta(prev: u64, cur: u64, width: u32) -> u64 {
    let mask = if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    };
    cur.wrapping_sub(prev) & mask
}

impl RdtMonitor {
    pub fn new(
        msr: Arc<dyn MsrAccess>,
        topology: &dyn Topology,
        info: MonInfo,
        cores: &[u32],
    ) -> Result<Self> {
        let mut core_socket = HashMap::new();
        let mut socket_lcores = BTreeMap::new();
        for socket in topology.sockets() {
            let socket_cores = topology.socket_cores(socket);
            if let Some(&first) = socket_cores.first() {
                socket_lcores.insert(socket, first);
            }
            for core in socket_cores {
                core_socket.insert(core, socket);
            }
        }

        let mut monitored = BTreeMap::new();
        for &core in cores {
            let socket = *core_socket.get(&core).ok_or_else(|| {
                RdtError::ConfigError(format!("Core {core} is not in the CPU topology"))
            })?;
            monitored.insert(
                core,
                CoreCounters {
                    socket,
                    ..Default::default()
                },
            );
        }

        Ok(Self {
            msr,
            info,
            cores: monitored,
            socket_lcores,
            rmid_used: vec![false; info.max_rmid as usize + 1],
        })
    }

    fn allocate_rmid(&mut self) -> Result<u32> {
        // RMID 0 is the default of every core
        for rmid in 1..self.rmid_used.len() {
            if !self.rmid_used[rmid] {
                self.rmid_used[rmid] = true;
                return Ok(rmid as u32);
            }
        }
        Err(RdtError::ConfigError(format!(
            "No free RMIDs available (max {})",
            self.info.max_rmid
        )))
    }

    fn free_rmid(&mut self, rmid: u32) {
        if let Some(used) = self.rmid_used.get_mut(rmid as usize) {
            *used = false;
        }
    }

    /// Give every monitored core its own RMID
    pub fn initialize(&mut self) -> Result<()> {
        let cores: Vec<u32> = self.cores.keys().copied().collect();
        for core in cores {
            let rmid = self.allocate_rmid()?;
            hw::assoc::set_rmid(self.msr.as_ref(), core, rmid)?;
            if let Some(counters) = self.cores.get_mut(&core) {
                counters.rmid = rmid;
            }
            tracing::info!("Initialized monitoring for core {} with RMID {}", core, rmid);
        }
        Ok(())
    }

    /// Re-apply RMIDs in case another agent rewrote the association
    pub fn refresh_rmids(&self) -> Result<()> {
        for (&core, counters) in &self.cores {
            if counters.rmid != 0 {
                hw::assoc::set_rmid(self.msr.as_ref(), core, counters.rmid)?;
            }
        }
        Ok(())
    }

    fn read(&self, lcore: u32, rmid: u32, event: MonEvent) -> Result<Option<u64>> {
        match hw::mon::read_counter(self.msr.as_ref(), lcore, rmid, event.event_id())? {
            CounterReading::Value(value) => Ok(Some(value)),
            CounterReading::Unavailable => {
                tracing::debug!("{} unavailable for RMID {}", event.name(), rmid);
                Ok(None)
            }
            CounterReading::Error => {
                tracing::warn!("{} reported an error for RMID {}", event.name(), rmid);
                Ok(None)
            }
        }
    }

    /// Sample every counter; bandwidth is averaged over `elapsed`
    pub fn update(&mut self, elapsed: Duration) -> Result<()> {
        let secs = elapsed.as_secs_f64();
        let scale = self.info.scale_factor as u64;
        let width = self.info.counter_width;

        let mut samples = Vec::with_capacity(self.cores.len());
        for (&core, counters) in &self.cores {
            let lcore = *self
                .socket_lcores
                .get(&counters.socket)
                .ok_or(RdtError::UnknownSocket(counters.socket))?;
            let mut values = Vec::with_capacity(3);
            for event in MonEvent::all() {
                values.push((event, self.read(lcore, counters.rmid, event)?));
            }
            samples.push((core, values));
        }

        for (core, values) in samples {
            let Some(counters) = self.cores.get_mut(&core) else {
                continue;
            };
            for (event, value) in values {
                let Some(value) = value else { continue };
                match event {
                    MonEvent::LlcOccupancy => counters.llc_occupancy = value * scale,
                    MonEvent::TotalMemBw | MonEvent::LocalMemBw => {
                        let prev = counters.prev.insert(event, value);
                        let rate = match prev {
                            Some(prev) if secs > 0.0 => {
                                (counter_delta(prev, value, width) * scale) as f64 / secs
                            }
                            _ => 0.0,
                        };
                        if event == MonEvent::TotalMemBw {
                            counters.total_bw = rate;
                        } else {
                            counters.local_bw = rate;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn metric_of(counters: &CoreCounters, metric: RdtMetric) -> f64 {
        match metric {
            RdtMetric::LlcOccupancy => counters.llc_occupancy as f64,
            RdtMetric::TotalMemoryBandwidth => counters.total_bw,
            RdtMetric::LocalMemoryBandwidth => counters.local_bw,
            RdtMetric::RemoteMemoryBandwidth => (counters.total_bw - counters.local_bw).max(0.0),
        }
    }

    pub fn cores(&self) -> Vec<u32> {
        self.cores.keys().copied().collect()
    }

    pub fn sockets(&self) -> Vec<u32> {
        let mut sockets: Vec<u32> = self.cores.values().map(|c| c.socket).collect();
        sockets.sort_unstable();
        sockets.dedup();
        sockets
    }

    pub fn rmid(&self, core: u32) -> Option<u32> {
        self.cores.get(&core).map(|c| c.rmid)
    }

    pub fn get_metrics(&self, core: u32) -> HashMap<RdtMetric, f64> {
        self.cores
            .get(&core)
            .map(|counters| {
                RdtMetric::all()
                    .into_iter()
                    .map(|metric| (metric, Self::metric_of(counters, metric)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sum over the monitored cores of `socket`
    pub fn get_socket_metrics(&self, socket: u32) -> HashMap<RdtMetric, f64> {
        let mut metrics = HashMap::new();
        for counters in self.cores.values().filter(|c| c.socket == socket) {
            for metric in RdtMetric::all() {
                *metrics.entry(metric).or_insert(0.0) += Self::metric_of(counters, metric);
            }
        }
        metrics
    }
}

impl Drop for RdtMonitor {
    fn drop(&mut self) {
        let cores: Vec<(u32, u32)> = self.cores.iter().map(|(&c, v)| (c, v.rmid)).collect();
        for (core, rmid) in cores {
            if rmid == 0 {
                continue;
            }
            if let Err(e) = hw::assoc::set_rmid(self.msr.as_ref(), core, 0) {
                tracing::warn!("Failed to release RMID {} of core {}: {}", rmid, core, e);
            }
            self.free_rmid(rmid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::discover_mon;
    use crate::testing::{FakeMsr, FakeTopology};
    use rdtctl_raw::rdt::msr::{IA32_PQR_ASSOC, IA32_QM_CTR, IA32_QM_EVTSEL};

    fn monitor(msr: &Arc<FakeMsr>, cores: &[u32]) -> RdtMonitor {
        let topo = FakeTopology::intel();
        let info = *discover_mon(&topo).info().unwrap();
        let msr: Arc<dyn MsrAccess> = msr.clone();
        RdtMonitor::new(msr, &topo, info, cores).unwrap()
    }

    #[test]
    fn test_counter_delta_wraps() {
        assert_eq!(counter_delta(10, 25, 24), 15);
        assert_eq!(counter_delta((1 << 24) - 5, 3, 24), 8);
        assert_eq!(counter_delta(5, 5, 24), 0);
    }

    #[test]
    fn test_initialize_assigns_rmids() {
        let msr = Arc::new(FakeMsr::new());
        msr.set(3, IA32_PQR_ASSOC, 2 << 32);

        let mut mon = monitor(&msr, &[1, 3]);
        mon.initialize().unwrap();

        assert_eq!(mon.rmid(1), Some(1));
        assert_eq!(mon.rmid(3), Some(2));
        // COS is kept
        assert_eq!(msr.get(3, IA32_PQR_ASSOC), (2 << 32) | 2);

        drop(mon);
        assert_eq!(msr.get(3, IA32_PQR_ASSOC), 2 << 32);
    }

    #[test]
    fn test_unknown_core() {
        let topo = FakeTopology::intel();
        let info = *discover_mon(&topo).info().unwrap();
        let msr: Arc<dyn MsrAccess> = Arc::new(FakeMsr::new());
        assert!(matches!(
            RdtMonitor::new(msr, &topo, info, &[42]),
            Err(RdtError::ConfigError(_))
        ));
    }

    #[test]
    fn test_update_computes_bandwidth() {
        let msr = Arc::new(FakeMsr::new());
        let mut mon = monitor(&msr, &[2]);
        mon.initialize().unwrap();

        // Counter reads go through core 2, the first core of socket 1
        msr.set(2, IA32_QM_CTR, 100);
        mon.update(Duration::from_secs(1)).unwrap();
        assert_eq!(msr.get(2, IA32_QM_EVTSEL) >> 32, 1);
        assert_eq!(mon.get_metrics(2)[&RdtMetric::TotalMemoryBandwidth], 0.0);
        assert_eq!(
            mon.get_metrics(2)[&RdtMetric::LlcOccupancy],
            (100 * 65536) as f64
        );

        msr.set(2, IA32_QM_CTR, 102);
        mon.update(Duration::from_secs(2)).unwrap();
        let metrics = mon.get_metrics(2);
        assert_eq!(metrics[&RdtMetric::TotalMemoryBandwidth], 65536.0);
        assert_eq!(metrics[&RdtMetric::LocalMemoryBandwidth], 65536.0);
        assert_eq!(metrics[&RdtMetric::RemoteMemoryBandwidth], 0.0);

        let socket = mon.get_socket_metrics(1);
        assert_eq!(socket[&RdtMetric::TotalMemoryBandwidth], 65536.0);
        assert!(mon.get_socket_metrics(0).is_empty());
    }

    #[test]
    fn test_unavailable_keeps_previous_value() {
        let msr = Arc::new(FakeMsr::new());
        let mut mon = monitor(&msr, &[0]);
        mon.initialize().unwrap();

        msr.set(0, IA32_QM_CTR, 10);
        mon.update(Duration::from_secs(1)).unwrap();
        msr.set(0, IA32_QM_CTR, 1 << 62);
        mon.update(Duration::from_secs(1)).unwrap();
        assert_eq!(
            mon.get_metrics(0)[&RdtMetric::LlcOccupancy],
            (10 * 65536) as f64
        );
    }
}
