//! Praetor-Sentinel: Guardrails Around the Governance Pipeline
//!
//! The supporting subsystems every governed call passes through before the
//! expensive machinery runs:
//!
//! - Kill switch: immediate halt for an agent or tenant, optional TTL
//! - JIT entitlements: time-bounded permission grants with background expiry
//! - Rate limiter: sliding one-minute window per `(tenant, agent)`
//! - Temporal jitter: cryptographically random response delays plus
//!   covert-channel timing analysis

pub mod entitlements;
pub mod jitter;
pub mod killswitch;
pub mod ratelimit;

// Re-exports
pub use entitlements::{
    EntitlementAudit, EntitlementConfig, EntitlementError, EntitlementStatus, JitEntitlement,
    JitEntitlements,
};
pub use jitter::{JitterConfig, JitterInjector, TimingVerdict};
pub use killswitch::{KillRecord, KillScope, KillSwitch};
pub use ratelimit::{RateLimitError, RateLimiter, RateLimiterConfig};
