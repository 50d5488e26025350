//! MSR access through `/dev/cpu/*/msr`

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use crate::common::affinity::AffinityGuard;

#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device for CPU {cpu}: {source}")]
    OpenFailed { cpu: u32, source: std::io::Error },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },

    #[error("Failed to pin to CPU {cpu}: {reason}")]
    PinFailed { cpu: u32, reason: String },
}

/// Register-level access to one logical core's MSRs
///
/// Implementations do not retry: a faulted access is reported as is.
pub trait MsrAccess: Send + Sync {
    fn read(&self, lcore: u32, reg: u32) -> Result<u64, MsrError>;

    fn write(&self, lcore: u32, reg: u32, value: u64) -> Result<(), MsrError>;
}

pub struct MsrHandle {
    file: parking_lot::Mutex<File>,
    cpu_id: u32,
}

impl MsrHandle {
    pub fn new(cpu: u32) -> Result<Self, MsrError> {
        let path = format!("/dev/cpu/{cpu}/msr");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| MsrError::OpenFailed { cpu, source })?;

        tracing::info!("Opened MSR handle {} for core {}", file.as_raw_fd(), cpu);

        Ok(Self {
            file: parking_lot::Mutex::new(file),
            cpu_id: cpu,
        })
    }

    fn pin(&self) -> Result<AffinityGuard, MsrError> {
        AffinityGuard::new(self.cpu_id).map_err(|e| MsrError::PinFailed {
            cpu: self.cpu_id,
            reason: e.to_string(),
        })
    }

    pub fn read(&self, addr: u32) -> Result<u64, MsrError> {
        let _affinity = self.pin()?;
        let mut file = self.file.lock();
        let read_failed = |source| MsrError::ReadFailed {
            cpu: self.cpu_id,
            msr: addr,
            source,
        };

        file.seek(SeekFrom::Start(addr as u64)).map_err(read_failed)?;

        let mut buffer = [0u8; 8];
        file.read_exact(&mut buffer).map_err(read_failed)?;

        let value = u64::from_ne_bytes(buffer);
        tracing::debug!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(value)
    }

    pub fn write(&self, addr: u32, value: u64) -> Result<(), MsrError> {
        let _affinity = self.pin()?;
        let mut file = self.file.lock();
        let write_failed = |source| MsrError::WriteFailed {
            cpu: self.cpu_id,
            msr: addr,
            source,
        };

        file.seek(SeekFrom::Start(addr as u64))
            .map_err(write_failed)?;
        file.write_all(&value.to_ne_bytes()).map_err(write_failed)?;

        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} <- 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(())
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }
}

/// Process-wide cache of MSR device handles
pub struct MsrDevice {
    handles: RwLock<HashMap<u32, Arc<MsrHandle>>>,
}

impl MsrDevice {
    fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn instance() -> &'static MsrDevice {
        static INSTANCE: Lazy<MsrDevice> = Lazy::new(MsrDevice::new);
        &INSTANCE
    }

    fn get_handle(&self, cpu: u32) -> Result<Arc<MsrHandle>, MsrError> {
        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&cpu) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&cpu) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(MsrHandle::new(cpu)?);
        handles.insert(cpu, Arc::clone(&handle));
        Ok(handle)
    }
}

impl MsrAccess for MsrDevice {
    fn read(&self, lcore: u32, reg: u32) -> Result<u64, MsrError> {
        self.get_handle(lcore)?.read(reg)
    }

    fn write(&self, lcore: u32, reg: u32, value: u64) -> Result<(), MsrError> {
        self.get_handle(lcore)?.write(reg, value)
    }
}

impl MsrAccess for &'static MsrDevice {
    fn read(&self, lcore: u32, reg: u32) -> Result<u64, MsrError> {
        (**self).read(lcore, reg)
    }

    fn write(&self, lcore: u32, reg: u32, value: u64) -> Result<(), MsrError> {
        (**self).write(lcore, reg, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_singleton() {
        let msr1 = MsrDevice::instance();
        let msr2 = MsrDevice::instance();
        assert!(std::ptr::eq(msr1, msr2));
    }

    #[test]
    fn test_msr_error_display() {
        let err = MsrError::OpenFailed {
            cpu: 0,
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("Failed to open MSR device"));
    }
}
