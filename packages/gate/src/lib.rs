//! Praetor-Gate: Tool Classification & Tri-Factor Escrow Barrier
//!
//! The decision core of the governance gateway. Every outbound tool call is
//! classified into a reversible (Ghost-Turn) or irreversible (Atomic-Hold)
//! escrow policy, then held behind a three-way barrier that only opens when
//! the identity, signal and cognitive validators all approve.
//!
//! Features:
//! - Policy registry with fail-secure defaults for unknown tools
//! - Ordered dynamic overrides (low trust, high amounts, missing entitlements)
//! - Tri-factor barrier with single-delivery release semantics
//! - Remote entropy validator with local Shannon fallback
//! - Weighted cognitive jury with ALLOW / WARN / BLOCK bands
//! - Extended per-factor validation for irreversible calls
//!
//! # Example
//!
//! ```rust,ignore
//! use praetor_gate::{EscrowGate, SignalSource};
//!
//! let gate = EscrowGate::new(validators);
//! gate.hold("tx-1", "tenant-a", "agent-7", payload)?;
//! let released = gate.await_release("tx-1", Duration::from_secs(30)).await?;
//! ```

pub mod classifier;
pub mod entropy;
pub mod extended;
pub mod jury;
pub mod trifactor;
pub mod types;
pub mod validators;

// Re-exports
pub use classifier::{default_registry, ToolClassifier};
pub use entropy::{EntropyAnalyzer, EntropyVerdict};
pub use extended::{
    ApeRule, CheckResult, ExtendedGate, ExtendedReport, ExtendedVerdict, FactorReport,
    IdentityAttestor, StaticAttestor,
};
pub use jury::{JuryAction, JuryClient, JuryError, LocalJury, TrafficEvent, TrustSignals, VerdictResponse};
pub use trifactor::{EscrowGate, GateError, HeldItem, SignalOutcome};
pub use types::{
    ClassificationRequest, ClassificationResult, ClassifierVerdict, EntitlementCheck,
    EscrowDecision, SignalSource, ToolClass, ToolClassification, TrustCheck, ValidationContext,
};
pub use validators::{
    standard_validators, CognitiveValidator, FactorValidator, IdentityValidator, SignalValidator,
};
