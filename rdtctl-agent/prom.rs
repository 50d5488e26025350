use prometheus::{Gauge, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::monitor::{RdtMetric, RdtMonitor};

/// RMIDs are re-applied every this many collections
const RMID_REFRESH_INTERVAL: u32 = 30;

type GaugeMap = HashMap<RdtMetric, HashMap<u32, Gauge>>;

pub struct RdtMetricExporter {
    registry: Arc<Registry>,
    monitor: Arc<parking_lot::Mutex<RdtMonitor>>,
    socket_gauges: GaugeMap,
    core_gauges: GaugeMap,
}

impl RdtMetricExporter {
    /// Takes over `monitor`, assigning RMIDs to its cores
    pub fn new(mut monitor: RdtMonitor) -> Result<Self> {
        monitor.initialize()?;

        let registry = Arc::new(Registry::new());
        let mut socket_gauges = GaugeMap::new();
        let mut core_gauges = GaugeMap::new();

        for metric in RdtMetric::all() {
            let socket_opts = Opts::new(format!("rdt_socket_{}", metric.name()), metric.help());
            let core_opts = Opts::new(format!("rdt_core_{}", metric.name()), metric.help());

            let mut socket_map = HashMap::new();
            for socket in monitor.sockets() {
                let gauge = Gauge::with_opts(
                    socket_opts
                        .clone()
                        .const_label("socket", socket.to_string()),
                )?;
                registry.register(Box::new(gauge.clone()))?;
                socket_map.insert(socket, gauge);
            }
            socket_gauges.insert(metric, socket_map);

            let mut core_map = HashMap::new();
            for core in monitor.cores() {
                let gauge =
                    Gauge::with_opts(core_opts.clone().const_label("core", core.to_string()))?;
                registry.register(Box::new(gauge.clone()))?;
                core_map.insert(core, gauge);
            }
            core_gauges.insert(metric, core_map);
        }

        Ok(Self {
            registry,
            monitor: Arc::new(parking_lot::Mutex::new(monitor)),
            socket_gauges,
            core_gauges,
        })
    }

    fn publish(gauges: &GaugeMap, id: u32, values: &HashMap<RdtMetric, f64>) {
        for (metric, value) in values {
            if let Some(gauge) = gauges.get(metric).and_then(|m| m.get(&id)) {
                gauge.set(*value);
            }
        }
    }

    /// Sample the counters once and update every gauge
    pub fn collect(&self, elapsed: Duration) {
        let mut mon = self.monitor.lock();
        if let Err(e) = mon.update(elapsed) {
            tracing::error!("Failed to update RDT metrics: {}", e);
            return;
        }

        for socket in mon.sockets() {
            Self::publish(&self.socket_gauges, socket, &mon.get_socket_metrics(socket));
        }
        for core in mon.cores() {
            Self::publish(&self.core_gauges, core, &mon.get_metrics(core));
        }
    }

    fn refresh_rmids(&self) {
        if let Err(e) = self.monitor.lock().refresh_rmids() {
            tracing::error!("Failed to refresh RMIDs: {}", e);
        }
    }

    /// Collect every second until `cancel` fires
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Starting RDT collection loop");

            let mut interval = tokio::time::interval(Duration::from_secs(1));
            let mut last = Instant::now();
            let mut collections = 0u32;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let now = Instant::now();
                self.collect(now - last);
                last = now;

                collections += 1;
                if collections >= RMID_REFRESH_INTERVAL {
                    self.refresh_rmids();
                    collections = 0;
                }
            }

            tracing::info!("RDT collection loop stopped");
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}
