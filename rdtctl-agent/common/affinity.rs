use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{RdtError, Result};

/// Pins the calling thread to one CPU until dropped
pub struct AffinityGuard {
    old_affinity: CpuSet,
}

impl AffinityGuard {
    pub fn new(cpu: u32) -> Result<Self> {
        let this_thread = Pid::from_raw(0);

        let old_affinity = sched_getaffinity(this_thread)
            .map_err(|e| RdtError::AffinityError(format!("Failed to get affinity: {e}")))?;

        let mut pinned = CpuSet::new();
        pinned.set(cpu as usize).map_err(|e| {
            RdtError::AffinityError(format!("CPU {cpu} does not fit in a CPU set: {e}"))
        })?;

        sched_setaffinity(this_thread, &pinned).map_err(|e| {
            RdtError::AffinityError(format!("Failed to set affinity to CPU {cpu}: {e}"))
        })?;

        Ok(Self { old_affinity })
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        let _ = sched_setaffinity(Pid::from_raw(0), &self.old_affinity);
    }
}
