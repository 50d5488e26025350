//! One-time initialization of the process-wide RDT state
//!
//! [`init`] detects the vendor, discovers capabilities, resolves the
//! backend and publishes the result. After that the state is immutable and
//! handed out by shared reference; a failed [`init`] publishes nothing.

use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::capability::Capabilities;
use crate::config::{Interface, RdtConfig};
use crate::dispatch::Backend;
use crate::error::{RdtError, Result};
use crate::os::ResctrlError;
use crate::platform::Platform;
use crate::vendor::{discover_vendor, VendorProfile};

#[derive(Debug, Clone, Serialize)]
pub struct RdtState {
    pub profile: VendorProfile,
    pub caps: Capabilities,
    pub backend: Backend,
}

static STATE: OnceCell<RdtState> = OnceCell::new();

/// Pick the backend for the requested interface
pub fn resolve_backend(interface: Interface, platform: &Platform) -> Result<Backend> {
    let os_available = platform.resctrl.is_available();

    match interface {
        Interface::Msr => Ok(Backend::Hardware),
        Interface::Os if os_available => Ok(Backend::Os),
        Interface::Os => Err(ResctrlError::Unsupported(
            "the OS interface without a resctrl mount".to_string(),
        )
        .into()),
        Interface::Auto if os_available => Ok(Backend::Os),
        Interface::Auto => Ok(Backend::Hardware),
    }
}

impl RdtState {
    /// Build the state without publishing it
    pub fn detect(platform: &Platform, config: &RdtConfig) -> Result<Self> {
        let topology = platform.topology.as_ref();
        let profile = discover_vendor(topology)?;
        let caps = Capabilities::discover(topology, &profile);
        let profile = profile.with_bandwidth_capability(caps.mba);
        let backend = resolve_backend(config.interface, platform)?;

        tracing::info!("Using the {} interface", backend);
        Ok(Self {
            profile,
            caps,
            backend,
        })
    }
}

/// Detect and publish the process-wide state
pub fn init(platform: &Platform, config: &RdtConfig) -> Result<&'static RdtState> {
    if STATE.get().is_some() {
        return Err(RdtError::AlreadyInitialized);
    }

    let state = RdtState::detect(platform, config)?;
    STATE.set(state).map_err(|_| RdtError::AlreadyInitialized)?;
    self::state()
}

/// The published state; fails fast before a successful [`init`]
pub fn state() -> Result<&'static RdtState> {
    STATE.get().ok_or(RdtError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdt::Rdt;
    use crate::testing::{self, FakeTopology, ResctrlTree};

    // The only test touching the global state; it never publishes one.
    #[test]
    fn test_unknown_vendor_leaves_state_unset() {
        let (platform, _) = testing::hw_platform(FakeTopology::with_vendor("VIA VIA VIA "));
        let config = RdtConfig::default();

        assert!(matches!(
            init(&platform, &config),
            Err(RdtError::UnsupportedVendor(_))
        ));
        assert!(matches!(state(), Err(RdtError::NotInitialized)));
        assert!(matches!(
            Rdt::current(&platform),
            Err(RdtError::NotInitialized)
        ));
    }

    #[test]
    fn test_detect_refines_profile() {
        let (platform, _) = testing::hw_platform(FakeTopology::intel());
        let state = RdtState::detect(&platform, &RdtConfig::default()).unwrap();

        assert_eq!(state.backend, Backend::Hardware);
        assert_eq!(state.profile.mba_info().unwrap().num_classes, 8);
        assert_eq!(state.profile.mba_granularity, 10);
        assert!(state.caps.l3ca.info().is_some());
    }

    #[test]
    fn test_resolve_backend() {
        let (hw, _) = testing::hw_platform(FakeTopology::amd());
        assert_eq!(resolve_backend(Interface::Auto, &hw).unwrap(), Backend::Hardware);
        assert_eq!(resolve_backend(Interface::Msr, &hw).unwrap(), Backend::Hardware);
        assert!(matches!(
            resolve_backend(Interface::Os, &hw),
            Err(RdtError::BackendInterface(_))
        ));

        let tree = ResctrlTree::new("MB:0=2048\n", 1);
        let os = testing::os_platform(FakeTopology::amd(), &tree);
        assert_eq!(resolve_backend(Interface::Auto, &os).unwrap(), Backend::Os);
        assert_eq!(resolve_backend(Interface::Msr, &os).unwrap(), Backend::Hardware);
    }
}
