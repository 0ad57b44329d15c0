//! Praetor-Meter: Per-Frame Governance Cost Metering
//!
//! Every frame traversing the socket boundary is charged a governance tax:
//! `base · risk_multiplier · trust_discount`, where the base scales with
//! payload size, the multiplier comes from the tool-class table and the
//! discount rewards trusted agents. Global counters are lock-free; per-
//! tenant meters track burn rate and are evicted after an hour of silence.
//!
//! # Example
//!
//! ```rust,ignore
//! use praetor_meter::{MeterConfig, SocketMeter};
//!
//! let meter = SocketMeter::new(MeterConfig::default());
//! let charge = meter.meter_frame("tenant-a", "agent-7", "data_query", 1024, 0.8);
//! assert!((charge.total_cost - 0.00185).abs() < 1e-9);
//! ```

pub mod socket;
pub mod tenant;

// Re-exports
pub use socket::{FrameCharge, MeterBillingEvent, MeterConfig, MeterTotals, SocketMeter};
pub use tenant::TenantMeter;
