use rdtctl_raw::rdt::mon::events;

enum_with_data! {
    /// Monitoring events selectable through `IA32_QM_EVTSEL`
    pub enum MonEvent: u8 {
        LlcOccupancy => ("LLCOccupancy", events::LLC_OCCUPANCY),
        TotalMemBw => ("TotalMemoryBandwidth", events::TOTAL_MEM_BW),
        LocalMemBw => ("LocalMemoryBandwidth", events::LOCAL_MEM_BW),
    }
    impl event_id -> u8
}

metric_enum! {
    pub enum RdtMetric {
        LlcOccupancy => "LLCOccupancy",
        TotalMemoryBandwidth => "TotalMemoryBandwidth",
        LocalMemoryBandwidth => "LocalMemoryBandwidth",
        RemoteMemoryBandwidth => "RemoteMemoryBandwidth",
    }
}

impl RdtMetric {
    pub fn help(&self) -> &'static str {
        match self {
            RdtMetric::LlcOccupancy => "Last level cache occupancy in bytes",
            RdtMetric::TotalMemoryBandwidth => "Total memory bandwidth in bytes per second",
            RdtMetric::LocalMemoryBandwidth => "Local memory bandwidth in bytes per second",
            RdtMetric::RemoteMemoryBandwidth => {
                "Remote memory bandwidth (total minus local) in bytes per second"
            }
        }
    }
}
