//! Praetor-Gateway: Governance Pipeline & HTTP Surface
//!
//! Wires the pillars into one governed path: every inbound tool call is
//! checked against the kill switch and rate limiter, metered, classified,
//! then either speculatively executed under Ghost-Turn escrow or held
//! atomically until the tri-factor barrier and a human clear it. Funds and
//! side effects commit or compensate with the verdict.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod reputation;
pub mod routes;
pub mod state;

// Re-exports
pub use config::GatewayConfig;
pub use error::GovernError;
pub use pipeline::{govern, GovernRequest, GovernVerdict, GovernanceResult, TriFactorReport};
pub use reputation::{Reputation, ReputationStore};
pub use routes::router;
pub use state::GatewayState;
