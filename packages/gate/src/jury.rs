//! Cognitive Jury
//!
//! The third barrier factor: a deliberation over the agent's trust signals.
//! The wire contract (`TrafficEvent` in, `VerdictResponse` out) matches the
//! remote jury service; `LocalJury` implements the same deliberation
//! in-process with the weighted trust formula.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Weighted factors of the jury trust score.
const WEIGHT_AUDIT: f64 = 0.40;
const WEIGHT_REPUTATION: f64 = 0.30;
const WEIGHT_ATTESTATION: f64 = 0.20;
const WEIGHT_HISTORY: f64 = 0.10;

/// Trust bands for the jury verdict.
const ALLOW_THRESHOLD: f64 = 0.75;
const WARN_THRESHOLD: f64 = 0.65;

/// Jury transport and deliberation errors.
#[derive(Debug, Clone, Error)]
pub enum JuryError {
    #[error("jury transport failed: {0}")]
    Transport(String),
    #[error("jury deliberation failed: {0}")]
    Deliberation(String),
}

/// Event submitted to the jury for deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEvent {
    /// Correlates the verdict with the held transaction
    pub request_id: String,
    /// Contextual metadata (agent_id, tenant_id, tool, ...)
    pub metadata: HashMap<String, String>,
    /// The payload under escrow
    pub payload: Vec<u8>,
}

impl TrafficEvent {
    /// Build an event for a held transaction.
    pub fn new(request_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            request_id: request_id.into(),
            metadata: HashMap::new(),
            payload,
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Jury action bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JuryAction {
    /// Trust at or above 0.75
    Allow,
    /// Trust in [0.65, 0.75); approves with a warning
    Warn,
    /// Trust below 0.65
    Block,
}

impl JuryAction {
    /// WARN still counts as an approval for the barrier.
    pub fn approves(&self) -> bool {
        !matches!(self, Self::Block)
    }
}

/// Verdict returned by the jury.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JuryVerdict {
    /// Action band
    pub action: JuryAction,
    /// Weighted trust level that produced it
    pub trust_level: f64,
}

/// Full jury response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictResponse {
    /// Echoes the submitted request id
    pub request_id: String,
    /// Response metadata
    pub metadata: HashMap<String, String>,
    /// The verdict
    pub verdict: JuryVerdict,
    /// Human-readable reasoning
    pub reasoning: String,
}

/// The cognitive validator seam; remote jury services implement this.
#[async_trait]
pub trait JuryClient: Send + Sync {
    /// Deliberate over one traffic event.
    async fn deliberate(&self, event: TrafficEvent) -> Result<VerdictResponse, JuryError>;
}

/// Per-agent trust signals fed into the weighted formula.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustSignals {
    /// Audit trail quality [0, 1]
    pub audit: f64,
    /// Long-run reputation [0, 1]
    pub reputation: f64,
    /// Attestation strength [0, 1]
    pub attestation: f64,
    /// Interaction history [0, 1]
    pub history: f64,
}

impl TrustSignals {
    /// Weighted trust: 0.40 audit + 0.30 reputation + 0.20 attestation + 0.10 history.
    pub fn weighted(&self) -> f64 {
        WEIGHT_AUDIT * self.audit
            + WEIGHT_REPUTATION * self.reputation
            + WEIGHT_ATTESTATION * self.attestation
            + WEIGHT_HISTORY * self.history
    }

    /// Uniform signals at the given level.
    pub fn uniform(level: f64) -> Self {
        Self {
            audit: level,
            reputation: level,
            attestation: level,
            history: level,
        }
    }
}

impl Default for TrustSignals {
    fn default() -> Self {
        // Unrecorded agents deliberate at a mid-band default.
        Self::uniform(0.70)
    }
}

/// In-process jury using the weighted trust formula.
pub struct LocalJury {
    /// Per-agent trust signals
    signals: RwLock<HashMap<String, TrustSignals>>,
    /// Signals applied to agents with no record
    default_signals: TrustSignals,
}

impl Default for LocalJury {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalJury {
    /// Create a jury with the default mid-band fallback signals.
    pub fn new() -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            default_signals: TrustSignals::default(),
        }
    }

    /// Override the fallback signals for unrecorded agents.
    pub fn with_default_signals(mut self, signals: TrustSignals) -> Self {
        self.default_signals = signals;
        self
    }

    /// Record trust signals for an agent.
    pub fn set_signals(&self, agent_id: impl Into<String>, signals: TrustSignals) {
        self.signals.write().insert(agent_id.into(), signals);
    }

    /// Current signals for an agent, falling back to the default.
    pub fn signals_for(&self, agent_id: &str) -> TrustSignals {
        self.signals
            .read()
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_signals)
    }

    fn band(trust: f64) -> JuryAction {
        if trust >= ALLOW_THRESHOLD {
            JuryAction::Allow
        } else if trust >= WARN_THRESHOLD {
            JuryAction::Warn
        } else {
            JuryAction::Block
        }
    }
}

#[async_trait]
impl JuryClient for LocalJury {
    async fn deliberate(&self, event: TrafficEvent) -> Result<VerdictResponse, JuryError> {
        let agent_id = event
            .metadata
            .get("agent_id")
            .cloned()
            .unwrap_or_default();
        let signals = self.signals_for(&agent_id);
        let trust = signals.weighted();
        let action = Self::band(trust);

        let reasoning = format!(
            "weighted trust {:.3} (audit {:.2}, reputation {:.2}, attestation {:.2}, history {:.2})",
            trust, signals.audit, signals.reputation, signals.attestation, signals.history
        );

        tracing::info!(
            request_id = %event.request_id,
            agent_id = %agent_id,
            trust,
            action = ?action,
            "Jury deliberation complete"
        );

        Ok(VerdictResponse {
            request_id: event.request_id,
            metadata: event.metadata,
            verdict: JuryVerdict {
                action,
                trust_level: trust,
            },
            reasoning,
        })
    }
}
