use std::io;
use thiserror::Error;

use rdtctl_raw::RegisterError;

use crate::common::msr::MsrError;
use crate::os::ResctrlError;

#[derive(Error, Debug)]
pub enum RdtError {
    #[error("Unsupported CPU vendor: {0}")]
    UnsupportedVendor(String),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("Invalid bandwidth percentage {0}, expected 1..=100")]
    InvalidPercentage(u32),

    #[error("{0} is not supported on this platform")]
    FeatureNotSupported(&'static str),

    #[error("Register access failed: {0}")]
    RegisterAccessFailed(#[from] MsrError),

    #[error(transparent)]
    BackendInterface(#[from] ResctrlError),

    #[error("Socket {0} not found in CPU topology")]
    UnknownSocket(u32),

    #[error("RDT layer is not initialized")]
    NotInitialized,

    #[error("RDT layer is already initialized")]
    AlreadyInitialized,

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

impl RdtError {
    /// True for errors caused by bad caller input rather than the platform
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            RdtError::Register(_) | RdtError::InvalidPercentage(_) | RdtError::UnknownSocket(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RdtError>;
