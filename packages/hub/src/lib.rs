//! Praetor-Hub: Event Fan-Out Router
//!
//! Dispatches governance events (verdicts, trust changes, spoke lifecycle,
//! kills) to registered spokes by capability and tenant. Routing is a
//! single O(n) scan; delivery is fire-and-forget into bounded per-spoke
//! channels so one slow consumer can never stall the router.
//!
//! The hub is a process-wide singleton initialized at gateway start and
//! torn down at stop; tests construct instances directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use praetor_hub::{Destination, Hub, HubMessage, MessageType, SpokeRegistry};
//!
//! let registry = Arc::new(SpokeRegistry::new());
//! let mut spoke = registry.register("tenant-a", "audit", caps, 0.9, entitlements);
//! let hub = Hub::new(registry);
//! hub.route(HubMessage::new(MessageType::Verdict, "gateway",
//!     Destination::parse("cap://governance.verdict"), "tenant-a", payload))?;
//! ```

pub mod registry;
pub mod router;
pub mod types;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

// Re-exports
pub use registry::{SpokeHandle, SpokeRegistry, DEFAULT_SPOKE_CHANNEL_CAPACITY};
pub use router::{Hub, HubError, HubMetrics, RouteOutcome};
pub use types::{Destination, HubMessage, MessageType, SpokeDescriptor};

/// Process-wide hub slot.
static GLOBAL_HUB: Lazy<RwLock<Option<Arc<Hub>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide hub. Replaces any previous instance.
pub fn init_global(hub: Arc<Hub>) {
    let mut slot = GLOBAL_HUB.write();
    if slot.is_some() {
        tracing::warn!("Global hub re-initialized");
    }
    *slot = Some(hub);
}

/// The process-wide hub, if initialized.
pub fn global() -> Option<Arc<Hub>> {
    GLOBAL_HUB.read().clone()
}

/// Tear down the process-wide hub at gateway stop.
pub fn teardown_global() {
    *GLOBAL_HUB.write() = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_lifecycle() {
        teardown_global();
        assert!(global().is_none());

        let hub = Arc::new(Hub::new(Arc::new(SpokeRegistry::new())));
        init_global(hub.clone());
        assert!(global().is_some());

        teardown_global();
        assert!(global().is_none());
    }
}
