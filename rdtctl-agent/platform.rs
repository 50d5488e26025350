use std::sync::Arc;

use crate::common::{MsrAccess, MsrDevice, SysTopology, Topology};
use crate::config::RdtConfig;
use crate::error::{RdtError, Result};
use crate::os::{Resctrl, ResctrlInterface};

/// The collaborators every RDT operation goes through
#[derive(Clone)]
pub struct Platform {
    pub topology: Arc<dyn Topology>,
    pub msr: Arc<dyn MsrAccess>,
    pub resctrl: Arc<dyn ResctrlInterface>,
}

impl Platform {
    pub fn new(
        topology: Arc<dyn Topology>,
        msr: Arc<dyn MsrAccess>,
        resctrl: Arc<dyn ResctrlInterface>,
    ) -> Self {
        Self {
            topology,
            msr,
            resctrl,
        }
    }

    /// The running machine: cpuid, `/dev/cpu/*/msr` and the resctrl mount
    pub fn system(config: &RdtConfig) -> Self {
        Self::new(
            Arc::new(SysTopology::detect()),
            Arc::new(MsrDevice::instance()),
            Arc::new(Resctrl::new(&config.resctrl_path)),
        )
    }

    /// Core through which the registers of `socket` are accessed
    pub fn socket_lcore(&self, socket: u32) -> Result<u32> {
        self.topology
            .socket_lcore(socket)
            .ok_or(RdtError::UnknownSocket(socket))
    }
}
