//! Gate Core Types
//!
//! Shared vocabulary for classification and the tri-factor barrier.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reversibility class of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolClass {
    /// Reversible: may execute speculatively inside a ghost container.
    A,
    /// Irreversible: execution is withheld until the barrier clears.
    B,
}

impl ToolClass {
    /// Human-readable name used in verdicts and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "reversible",
            Self::B => "irreversible",
        }
    }
}

/// Escrow policy produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowDecision {
    /// Speculative execution with output held in escrow.
    GhostTurn,
    /// Atomic hold: nothing runs until tri-factor approval.
    AtomicHold,
}

/// Final classifier verdict for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassifierVerdict {
    /// Safe to run speculatively under Ghost-Turn escrow.
    Proceed,
    /// Requires tri-factor convergence and human review.
    Escalate,
    /// Denied outright.
    Block,
}

/// Static policy for a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolClassification {
    /// Tool identifier (e.g. "read_database")
    pub id: String,
    /// Reversibility class
    pub class: ToolClass,
    /// Advisory reversibility score [0, 100]; class alone drives control flow
    pub reversibility_index: u8,
    /// Minimum agent reputation required
    pub min_reputation: f64,
    /// Entitlements the agent must hold
    pub required_entitlements: Vec<String>,
    /// Risk multiplier applied to escrow and metering
    pub risk_multiplier: f64,
    /// Whether a human must approve before commit
    pub hitl_required: bool,
}

impl ToolClassification {
    /// Fail-secure classification synthesized for unknown tools.
    pub fn fail_secure(tool_id: &str) -> Self {
        Self {
            id: tool_id.to_string(),
            class: ToolClass::B,
            reversibility_index: 0,
            min_reputation: 0.95,
            required_entitlements: Vec::new(),
            risk_multiplier: 5.0,
            hitl_required: true,
        }
    }
}

/// Per-call evaluation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    /// Tool being invoked
    pub tool_id: String,
    /// Calling agent
    pub agent_id: String,
    /// Tenant on whose behalf the call runs
    pub tenant_id: String,
    /// Tool arguments (inspected by dynamic overrides)
    pub args: serde_json::Value,
    /// Current agent trust score [0, 1]
    pub trust_score: f64,
    /// Entitlements currently held by the agent
    pub entitlements: HashSet<String>,
}

/// Outcome of the entitlement subset check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementCheck {
    /// All required entitlements present
    pub passed: bool,
    /// Required entitlements the agent is missing
    pub missing: Vec<String>,
}

/// Outcome of the trust threshold check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustCheck {
    /// Trust meets the tool's minimum
    pub passed: bool,
    /// Minimum reputation the tool demands
    pub required: f64,
    /// Agent's actual trust score
    pub actual: f64,
}

/// Per-call classification result dispatched to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Tool evaluated
    pub tool_id: String,
    /// Reversibility class after overrides
    pub class: ToolClass,
    /// Escrow policy after overrides
    pub escrow_decision: EscrowDecision,
    /// Entitlement check detail
    pub entitlement_check: EntitlementCheck,
    /// Trust check detail
    pub trust_check: TrustCheck,
    /// Dynamic overrides that fired, in order
    pub overrides: Vec<String>,
    /// Final verdict
    pub final_verdict: ClassifierVerdict,
    /// Human approval required
    pub hitl_required: bool,
    /// Risk multiplier for metering and escrow
    pub risk_multiplier: f64,
}

/// The three independent validator factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Local identity checks (agent / tenant shape, deny lists)
    Identity,
    /// Cognitive jury (weighted trust deliberation)
    Jury,
    /// Entropy / signal analysis of the escrowed payload
    Entropy,
}

impl SignalSource {
    /// The full set a held item must collect to release.
    pub const ALL: [SignalSource; 3] = [Self::Identity, Self::Jury, Self::Entropy];
}

/// Immutable snapshot handed to validators when an item is held.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Transaction id of the held item
    pub item_id: String,
    /// Tenant owning the transaction
    pub tenant_id: String,
    /// Agent that initiated the call (may be empty for compat holds)
    pub agent_id: String,
    /// The speculative payload under escrow
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_secure_defaults() {
        let tc = ToolClassification::fail_secure("mystery_tool");
        assert_eq!(tc.class, ToolClass::B);
        assert_eq!(tc.reversibility_index, 0);
        assert!((tc.min_reputation - 0.95).abs() < f64::EPSILON);
        assert!((tc.risk_multiplier - 5.0).abs() < f64::EPSILON);
        assert!(tc.hitl_required);
    }

    #[test]
    fn test_signal_source_full_set() {
        let set: HashSet<_> = SignalSource::ALL.into_iter().collect();
        assert_eq!(set.len(), 3);
        assert!(set.contains(&SignalSource::Identity));
        assert!(set.contains(&SignalSource::Jury));
        assert!(set.contains(&SignalSource::Entropy));
    }
}
