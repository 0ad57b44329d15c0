//! Governance Pipeline
//!
//! The full path of one governed tool call: kill switch, rate limit,
//! metering, classification, then either speculative execution under
//! Ghost-Turn escrow or an atomic hold, with the tri-factor barrier
//! deciding commit or compensation.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use praetor_escrow::EscrowClass;
use praetor_gate::{
    ClassifierVerdict, EscrowDecision, ExtendedVerdict, GateError, ValidationContext,
};
use praetor_hub::{Destination, HubMessage, MessageType};
use praetor_sandbox::GhostContainer;
use praetor_sentinel::RateLimitError;

use crate::error::GovernError;
use crate::state::GatewayState;

/// Inbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernRequest {
    /// Tool being invoked
    pub tool_name: String,
    /// Calling agent
    pub agent_id: String,
    /// Tenant; may instead be resolved from headers
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Tool arguments
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Model attribution, if any
    #[serde(default)]
    pub model: Option<String>,
    /// Session correlation
    #[serde(default)]
    pub session_id: Option<String>,
    /// Source protocol
    #[serde(default)]
    pub protocol: Option<String>,
    /// Client-side timestamp
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Public verdict of a governed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernVerdict {
    /// Committed; speculative output released
    Allow,
    /// Rejected; side effects compensated, funds refunded
    Block,
    /// Tri-factor passed but the artifact stays escrowed pending review
    Escrow,
    /// Irreversible call cleared tri-factor; human approval is next
    Escalate,
}

/// How the three factors resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriFactorReport {
    /// All three validators approved
    pub released: bool,
    /// The factor that terminated the item, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
}

/// Result envelope returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceResult {
    pub transaction_id: String,
    pub verdict: GovernVerdict,
    pub action_class: String,
    pub trust_score: f64,
    pub governance_tax: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tri_factor: Option<TriFactorReport>,
}

/// Map a tool name onto the meter's risk table.
fn meter_class(tool: &str) -> &str {
    if tool.starts_with("admin") {
        "admin"
    } else if tool.starts_with("read_") || tool.starts_with("query_") || tool.starts_with("get_") {
        "data_query"
    } else if tool.starts_with("list_") || tool.starts_with("describe_") {
        "read_only"
    } else if tool.starts_with("write_")
        || tool.starts_with("delete_")
        || tool.starts_with("update_")
    {
        "file_write"
    } else {
        tool
    }
}

/// Evidence hash over the canonical request envelope.
fn evidence_hash(tx_id: &str, tenant_id: &str, req: &GovernRequest) -> String {
    let canonical = serde_json::json!({
        "transaction_id": tx_id,
        "tenant_id": tenant_id,
        "tool_name": req.tool_name,
        "agent_id": req.agent_id,
        "arguments": req.arguments,
    });
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(bytes))
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

fn publish_verdict(state: &GatewayState, tenant_id: &str, tx_id: &str, result: &GovernanceResult) {
    let msg = HubMessage::new(
        MessageType::Verdict,
        "gateway",
        Destination::parse("cap://governance.verdict"),
        tenant_id,
        serde_json::json!({
            "transaction_id": tx_id,
            "verdict": result.verdict,
            "action_class": result.action_class,
            "governance_tax": result.governance_tax,
        }),
    );
    if let Err(e) = state.hub.route(msg) {
        tracing::debug!(error = %e, "Verdict event not delivered");
    }
}

/// Run one governed tool call end to end.
pub async fn govern(
    state: &Arc<GatewayState>,
    tx_id: String,
    tenant_id: String,
    req: GovernRequest,
) -> Result<GovernanceResult, GovernError> {
    // Kill switch first: killed targets pay for nothing.
    if let Some(record) = state.killswitch.active_kill(&req.agent_id, &tenant_id) {
        return Err(GovernError::Killed {
            reason: record.reason,
        });
    }

    if let Err(RateLimitError::Exceeded {
        retry_after_secs, ..
    }) = state.limiter.check(&tenant_id, &req.agent_id)
    {
        return Err(GovernError::RateLimitExceeded { retry_after_secs });
    }

    let trust = state.reputation.score(&req.agent_id);
    let frame = serde_json::to_vec(&req.arguments).unwrap_or_default();

    // Every frame crossing the boundary is metered.
    let charge = state.meter.meter_frame(
        &tenant_id,
        &req.agent_id,
        meter_class(&req.tool_name),
        frame.len(),
        trust,
    );

    let classification = state.classifier.classify(&praetor_gate::ClassificationRequest {
        tool_id: req.tool_name.clone(),
        agent_id: req.agent_id.clone(),
        tenant_id: tenant_id.clone(),
        args: req.arguments.clone(),
        trust_score: trust,
        entitlements: state.entitlements.active_permissions(&req.agent_id),
    });

    if classification.final_verdict == ClassifierVerdict::Block {
        state.reputation.record_outcome(&req.agent_id, false);
        if !classification.entitlement_check.passed {
            return Err(GovernError::EntitlementMissing {
                missing: classification.entitlement_check.missing,
            });
        }
        if !classification.trust_check.passed {
            return Err(GovernError::TrustInsufficient {
                required: classification.trust_check.required,
                actual: classification.trust_check.actual,
            });
        }
        return Err(GovernError::ClassificationReject {
            reason: format!("tool {} blocked by policy", req.tool_name),
        });
    }

    let entitlement_id = classification
        .entitlement_check
        .missing
        .is_empty()
        .then(|| {
            state
                .classifier
                .get(&req.tool_name)
                .and_then(|tc| tc.required_entitlements.first().cloned())
                .and_then(|perm| state.entitlements.grant_id(&req.agent_id, &perm))
                .map(|id| id.to_string())
        })
        .flatten();

    let evidence = evidence_hash(&tx_id, &tenant_id, &req);

    // Escrow hold sized by the trust-discounted frame cost and the
    // classifier's per-tool risk multiplier.
    let escrow_base = decimal(charge.base_cost * charge.trust_discount);
    let risk_mult = decimal(classification.risk_multiplier);

    let result = match classification.escrow_decision {
        EscrowDecision::GhostTurn => {
            govern_ghost_turn(
                state,
                &tx_id,
                &tenant_id,
                &req,
                &classification,
                escrow_base,
                risk_mult,
                frame,
            )
            .await?
        }
        EscrowDecision::AtomicHold => {
            govern_atomic_hold(
                state,
                &tx_id,
                &tenant_id,
                &req,
                escrow_base,
                risk_mult,
                frame,
            )
            .await?
        }
    };

    let result = GovernanceResult {
        transaction_id: tx_id.clone(),
        verdict: result.verdict,
        action_class: classification.class.name().to_string(),
        trust_score: trust,
        governance_tax: charge.governance_tax,
        escrow_id: result.escrow_id,
        entitlement_id,
        evidence_hash: Some(evidence),
        tri_factor: result.tri_factor,
    };

    publish_verdict(state, &tenant_id, &tx_id, &result);

    tracing::info!(
        transaction_id = %tx_id,
        tenant_id = %tenant_id,
        agent_id = %req.agent_id,
        tool = %req.tool_name,
        verdict = ?result.verdict,
        governance_tax = result.governance_tax,
        "Governed call complete"
    );

    Ok(result)
}

struct PathOutcome {
    verdict: GovernVerdict,
    escrow_id: Option<String>,
    tri_factor: Option<TriFactorReport>,
}

/// Reversible path: speculative execution in a ghost container, output
/// escrowed behind the tri-factor barrier.
#[allow(clippy::too_many_arguments)]
async fn govern_ghost_turn(
    state: &Arc<GatewayState>,
    tx_id: &str,
    tenant_id: &str,
    req: &GovernRequest,
    classification: &praetor_gate::ClassificationResult,
    escrow_base: Decimal,
    risk_mult: Decimal,
    frame: Vec<u8>,
) -> Result<PathOutcome, GovernError> {
    let container = state
        .pool
        .get(tenant_id, state.config.pool_get_timeout())
        .await?;

    let output = match state
        .pool
        .execute_speculative(&container, &[req.tool_name.clone()], &frame)
        .await
    {
        Ok(output) => output,
        Err(e) => {
            state.pool.put(container);
            return Err(e.into());
        }
    };

    state.ledger.hold_funds(
        tx_id,
        tenant_id,
        &req.agent_id,
        &req.tool_name,
        EscrowClass::Reversible,
        escrow_base,
        risk_mult,
    )?;

    if let Err(e) = state
        .gate
        .hold(tx_id, tenant_id, &req.agent_id, output.into_bytes())
    {
        state.ledger.refund_funds(tx_id)?;
        state.pool.put(container);
        return Err(GovernError::Internal(e.to_string()));
    }

    let decision = state.gate.await_release(tx_id, state.config.gate_timeout()).await;
    settle(state, tx_id, &req.agent_id, Some(container), decision, classification.hitl_required)
        .await
}

/// Irreversible path: nothing runs; the request itself is held until the
/// barrier clears and a human signs off.
async fn govern_atomic_hold(
    state: &Arc<GatewayState>,
    tx_id: &str,
    tenant_id: &str,
    req: &GovernRequest,
    escrow_base: Decimal,
    risk_mult: Decimal,
    frame: Vec<u8>,
) -> Result<PathOutcome, GovernError> {
    state.ledger.hold_funds(
        tx_id,
        tenant_id,
        &req.agent_id,
        &req.tool_name,
        EscrowClass::Irreversible,
        escrow_base,
        risk_mult,
    )?;

    if let Err(e) = state.gate.hold(tx_id, tenant_id, &req.agent_id, frame) {
        state.ledger.refund_funds(tx_id)?;
        return Err(GovernError::Internal(e.to_string()));
    }

    let decision = state.gate.await_release(tx_id, state.config.gate_timeout()).await;

    match decision {
        Ok(payload) => {
            // The barrier converged; the extended gate now runs the richer
            // per-factor checks irreversible calls require.
            let report = state.extended.evaluate(
                &ValidationContext {
                    item_id: tx_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    agent_id: req.agent_id.clone(),
                    payload,
                },
                &req.tool_name,
                &req.arguments,
                &state.jitter.intervals(&req.agent_id),
            );

            if report.verdict == ExtendedVerdict::Reject {
                let rejected_by = if !report.signal.passed {
                    "extended_signal"
                } else {
                    "extended_cognitive"
                };
                let mut outcome = reject_or_timeout(
                    state,
                    tx_id,
                    &req.agent_id,
                    None,
                    GateError::Rejected {
                        id: tx_id.to_string(),
                        signal_source: praetor_gate::SignalSource::Entropy,
                    },
                )
                .await?;
                outcome.tri_factor = Some(TriFactorReport {
                    released: false,
                    rejected_by: Some(rejected_by.to_string()),
                });
                return Ok(outcome);
            }

            // RELEASE, or HOLD with only identity outstanding: both wait on
            // the human step with funds and the request still escrowed.
            state.reputation.record_outcome(&req.agent_id, true);
            Ok(PathOutcome {
                verdict: GovernVerdict::Escalate,
                escrow_id: Some(tx_id.to_string()),
                tri_factor: Some(TriFactorReport {
                    released: true,
                    rejected_by: None,
                }),
            })
        }
        Err(e) => reject_or_timeout(state, tx_id, &req.agent_id, None, e).await,
    }
}

/// Commit or compensate after the barrier resolves on the reversible path.
async fn settle(
    state: &Arc<GatewayState>,
    tx_id: &str,
    agent_id: &str,
    container: Option<GhostContainer>,
    decision: Result<Vec<u8>, GateError>,
    hitl_required: bool,
) -> Result<PathOutcome, GovernError> {
    match decision {
        Ok(_payload) => {
            state.reputation.record_outcome(agent_id, true);
            if let Some(container) = container {
                state.pool.put(container);
            }

            if hitl_required {
                // Output cleared the barrier but stays escrowed for review.
                Ok(PathOutcome {
                    verdict: GovernVerdict::Escrow,
                    escrow_id: Some(tx_id.to_string()),
                    tri_factor: Some(TriFactorReport {
                        released: true,
                        rejected_by: None,
                    }),
                })
            } else {
                state.ledger.release_funds(tx_id)?;
                state.compensations.clear(tx_id);
                Ok(PathOutcome {
                    verdict: GovernVerdict::Allow,
                    escrow_id: Some(tx_id.to_string()),
                    tri_factor: Some(TriFactorReport {
                        released: true,
                        rejected_by: None,
                    }),
                })
            }
        }
        Err(e) => reject_or_timeout(state, tx_id, agent_id, container, e).await,
    }
}

/// Unwind a rejected or timed-out transaction: LIFO compensation, refund,
/// container scrub.
async fn reject_or_timeout(
    state: &Arc<GatewayState>,
    tx_id: &str,
    agent_id: &str,
    container: Option<GhostContainer>,
    error: GateError,
) -> Result<PathOutcome, GovernError> {
    let comp_results = state.compensations.execute(tx_id).await;
    let failed_undos = comp_results.iter().filter(|r| !r.success).count();
    if failed_undos > 0 {
        tracing::error!(
            transaction_id = %tx_id,
            failed_undos,
            "Compensation left dead-letter entries; verdict remains BLOCK"
        );
    }

    if let Err(refund_err) = state.ledger.refund_funds(tx_id) {
        tracing::warn!(transaction_id = %tx_id, error = %refund_err, "Refund skipped");
    }

    if let Some(container) = container {
        state.pool.put(container);
    }

    state.reputation.record_outcome(agent_id, false);

    match error {
        GateError::Rejected {
            signal_source: source,
            ..
        } => Ok(PathOutcome {
            verdict: GovernVerdict::Block,
            escrow_id: Some(tx_id.to_string()),
            tri_factor: Some(TriFactorReport {
                released: false,
                rejected_by: Some(format!("{source:?}").to_lowercase()),
            }),
        }),
        GateError::Timeout(id) => Err(GovernError::Timeout(id)),
        other => Err(GovernError::Internal(other.to_string())),
    }
}
