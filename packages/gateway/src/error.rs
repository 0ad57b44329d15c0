//! Governance Error Kinds
//!
//! The closed set of failures a governed call can surface. Everything the
//! caller sees maps onto one of four public verdicts; these errors carry
//! the HTTP shape for the cases that short-circuit the pipeline.

use praetor_escrow::EscrowError;
use praetor_sandbox::PoolError;
use thiserror::Error;

/// Failure kinds of the governance pipeline.
#[derive(Debug, Error)]
pub enum GovernError {
    /// Tenant could not be resolved from the request or headers.
    #[error("tenant could not be resolved")]
    Unauthenticated,

    /// Kill switch covers the agent or tenant.
    #[error("target is killed: {reason}")]
    Killed { reason: String },

    /// Sliding-window limiter rejected the call.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// Entitlement subset check failed.
    #[error("missing entitlements: {missing:?}")]
    EntitlementMissing { missing: Vec<String> },

    /// Agent trust is below the tool's minimum reputation.
    #[error("trust {actual:.2} below required {required:.2}")]
    TrustInsufficient { required: f64, actual: f64 },

    /// Classifier blocked for another reason.
    #[error("blocked by classification: {reason}")]
    ClassificationReject { reason: String },

    /// Sandbox layer failed (pool exhaustion or speculative exec).
    #[error(transparent)]
    Sandbox(#[from] PoolError),

    /// Escrow ledger refused a transition.
    #[error(transparent)]
    Escrow(#[from] EscrowError),

    /// Tri-factor convergence did not happen within the deadline.
    #[error("governance gate timed out for transaction {0}")]
    Timeout(String),

    /// Unexpected internal failure.
    #[error("internal governance failure: {0}")]
    Internal(String),
}

impl GovernError {
    /// HTTP status the error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::Killed { .. }
            | Self::EntitlementMissing { .. }
            | Self::TrustInsufficient { .. }
            | Self::ClassificationReject { .. } => 403,
            Self::RateLimitExceeded { .. } => 429,
            Self::Sandbox(PoolError::Exhausted) | Self::Sandbox(PoolError::Closed) => 503,
            Self::Sandbox(_) => 502,
            Self::Timeout(_) => 504,
            Self::Escrow(_) | Self::Internal(_) => 500,
        }
    }

    /// Machine-readable kind tag for response bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Killed { .. } => "killed",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::EntitlementMissing { .. } => "entitlement_missing",
            Self::TrustInsufficient { .. } => "trust_insufficient",
            Self::ClassificationReject { .. } => "classification_reject",
            Self::Sandbox(_) => "sandbox_failure",
            Self::Escrow(_) => "escrow_failure",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GovernError::Unauthenticated.status_code(), 401);
        assert_eq!(
            GovernError::Killed {
                reason: "rogue".to_string()
            }
            .status_code(),
            403
        );
        assert_eq!(
            GovernError::EntitlementMissing {
                missing: vec!["payment:execute".to_string()]
            }
            .status_code(),
            403
        );
        assert_eq!(
            GovernError::RateLimitExceeded {
                retry_after_secs: 60
            }
            .status_code(),
            429
        );
        assert_eq!(GovernError::Sandbox(PoolError::Exhausted).status_code(), 503);
        assert_eq!(GovernError::Timeout("tx-1".to_string()).status_code(), 504);
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            GovernError::TrustInsufficient {
                required: 0.8,
                actual: 0.4
            }
            .kind(),
            "trust_insufficient"
        );
        assert_eq!(GovernError::Sandbox(PoolError::Exhausted).kind(), "sandbox_failure");
    }
}
