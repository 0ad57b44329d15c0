//! Extended Tri-Factor Gate
//!
//! Richer per-factor validation for irreversible (Class B) calls. Each
//! factor runs a bundle of named checks; the final verdict is RELEASE when
//! all three factors pass, HOLD when only identity failed (recoverable by a
//! human), REJECT otherwise.
//!
//! MFAA and SPIFFE are treated as opaque verifiers behind the
//! [`IdentityAttestor`] seam.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use crate::entropy::EntropyAnalyzer;
use crate::types::ValidationContext;

/// Coefficient-of-variation floor below which response timing looks
/// machine-regular enough to be a covert channel.
const STEGANOGRAPHIC_CV_FLOOR: f64 = 0.15;

/// Final verdict of the extended gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtendedVerdict {
    /// All three factors passed
    Release,
    /// Only identity failed; a human can re-attest and resume
    Hold,
    /// Signal or cognition failed
    Reject,
}

/// One named check inside a factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name (e.g. "mfaa", "baseline_hash")
    pub name: String,
    /// Whether it passed
    pub passed: bool,
    /// Operator-facing detail
    pub detail: String,
}

/// Per-factor report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorReport {
    /// Factor passed iff every check passed
    pub passed: bool,
    /// Individual checks
    pub checks: Vec<CheckResult>,
}

impl FactorReport {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        Self {
            passed: checks.iter().all(|c| c.passed),
            checks,
        }
    }
}

/// Full extended evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedReport {
    /// Identity factor (MFAA, SPIFFE, id shape)
    pub identity: FactorReport,
    /// Signal factor (jitter variance, baseline hash, entropy)
    pub signal: FactorReport,
    /// Cognitive factor (APE rules, intent extraction)
    pub cognitive: FactorReport,
    /// Final verdict
    pub verdict: ExtendedVerdict,
}

/// Opaque identity attestation seam (MFAA enrollment, SPIFFE identity).
pub trait IdentityAttestor: Send + Sync {
    /// Multi-factor agent attestation.
    fn verify_mfaa(&self, agent_id: &str) -> bool;
    /// Workload identity attestation.
    fn verify_spiffe(&self, tenant_id: &str, agent_id: &str) -> bool;
}

/// Attestor backed by static enrollment sets; the development default.
#[derive(Debug, Default)]
pub struct StaticAttestor {
    mfaa_enrolled: HashSet<String>,
    spiffe_ids: HashSet<String>,
}

impl StaticAttestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll an agent for MFAA.
    pub fn enroll_mfaa(mut self, agent_id: impl Into<String>) -> Self {
        self.mfaa_enrolled.insert(agent_id.into());
        self
    }

    /// Register a workload identity as `tenant/agent`.
    pub fn register_spiffe(mut self, tenant_id: &str, agent_id: &str) -> Self {
        self.spiffe_ids.insert(format!("{tenant_id}/{agent_id}"));
        self
    }
}

impl IdentityAttestor for StaticAttestor {
    fn verify_mfaa(&self, agent_id: &str) -> bool {
        self.mfaa_enrolled.contains(agent_id)
    }

    fn verify_spiffe(&self, tenant_id: &str, agent_id: &str) -> bool {
        self.spiffe_ids.contains(&format!("{tenant_id}/{agent_id}"))
    }
}

/// Agent Policy Enforcement rule: a forbidden intent pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApeRule {
    /// Rule id
    pub id: String,
    /// Substring matched against the extracted intent
    pub pattern: String,
    /// Why the pattern is forbidden
    pub description: String,
}

/// The extended gate for Class B calls.
pub struct ExtendedGate {
    attestor: Arc<dyn IdentityAttestor>,
    analyzer: EntropyAnalyzer,
    /// Known-good payload hashes; empty set disables the baseline check
    baseline_hashes: RwLock<HashSet<String>>,
    /// Forbidden intent patterns
    ape_rules: RwLock<Vec<ApeRule>>,
}

impl ExtendedGate {
    /// Create an extended gate over an attestor.
    pub fn new(attestor: Arc<dyn IdentityAttestor>) -> Self {
        Self {
            attestor,
            analyzer: EntropyAnalyzer::new(),
            baseline_hashes: RwLock::new(HashSet::new()),
            ape_rules: RwLock::new(Vec::new()),
        }
    }

    /// Register a known-good payload baseline.
    pub fn register_baseline(&self, payload: &[u8]) {
        self.baseline_hashes.write().insert(Self::hash(payload));
    }

    /// Add an APE rule.
    pub fn add_rule(&self, rule: ApeRule) {
        self.ape_rules.write().push(rule);
    }

    fn hash(payload: &[u8]) -> String {
        hex::encode(Sha256::digest(payload))
    }

    /// Extract a lowercase intent string from the tool name and arguments.
    ///
    /// Remote deployments replace this with model-driven extraction; the
    /// local form concatenates the tool, any `action`/`intent` argument and
    /// string argument values.
    pub fn extract_intent(tool_id: &str, args: &serde_json::Value) -> String {
        let mut parts = vec![tool_id.to_lowercase()];
        if let Some(obj) = args.as_object() {
            for key in ["action", "intent"] {
                if let Some(v) = obj.get(key).and_then(|v| v.as_str()) {
                    parts.push(v.to_lowercase());
                }
            }
            for (key, value) in obj {
                if key == "action" || key == "intent" {
                    continue;
                }
                if let Some(s) = value.as_str() {
                    parts.push(s.to_lowercase());
                }
            }
        }
        parts.join(" ")
    }

    fn identity_factor(&self, ctx: &ValidationContext) -> FactorReport {
        let shape_ok = !ctx.agent_id.is_empty() && !ctx.tenant_id.is_empty();
        let mfaa = self.attestor.verify_mfaa(&ctx.agent_id);
        let spiffe = self.attestor.verify_spiffe(&ctx.tenant_id, &ctx.agent_id);

        FactorReport::from_checks(vec![
            CheckResult {
                name: "id_shape".to_string(),
                passed: shape_ok,
                detail: format!("agent '{}' tenant '{}'", ctx.agent_id, ctx.tenant_id),
            },
            CheckResult {
                name: "mfaa".to_string(),
                passed: mfaa,
                detail: if mfaa {
                    "agent attested".to_string()
                } else {
                    "agent not MFAA-enrolled".to_string()
                },
            },
            CheckResult {
                name: "spiffe".to_string(),
                passed: spiffe,
                detail: if spiffe {
                    "workload identity verified".to_string()
                } else {
                    "no workload identity".to_string()
                },
            },
        ])
    }

    fn signal_factor(&self, ctx: &ValidationContext, intervals: &[f64]) -> FactorReport {
        let cv = coefficient_of_variation(intervals);
        let jitter_ok = match cv {
            // Too few samples to judge: pass.
            None => true,
            Some(cv) => cv >= STEGANOGRAPHIC_CV_FLOOR,
        };

        let baselines = self.baseline_hashes.read();
        let (baseline_ok, baseline_detail) = if baselines.is_empty() {
            (true, "no baseline registered".to_string())
        } else {
            let h = Self::hash(&ctx.payload);
            let known = baselines.contains(&h);
            (
                known,
                if known {
                    "payload matches baseline".to_string()
                } else {
                    format!("payload hash {} not in baseline", &h[..12])
                },
            )
        };

        let entropy_ok = self.analyzer.analyze(&ctx.payload).approves();

        FactorReport::from_checks(vec![
            CheckResult {
                name: "jitter_variance".to_string(),
                passed: jitter_ok,
                detail: match cv {
                    Some(cv) => format!("interval CV {:.3}", cv),
                    None => "insufficient samples".to_string(),
                },
            },
            CheckResult {
                name: "baseline_hash".to_string(),
                passed: baseline_ok,
                detail: baseline_detail,
            },
            CheckResult {
                name: "entropy".to_string(),
                passed: entropy_ok,
                detail: format!("{:.3} bits/byte", self.analyzer.entropy(&ctx.payload)),
            },
        ])
    }

    fn cognitive_factor(&self, tool_id: &str, args: &serde_json::Value) -> FactorReport {
        let intent = Self::extract_intent(tool_id, args);
        let intent_ok = !intent.trim().is_empty();

        let rules = self.ape_rules.read();
        let violated: Vec<&ApeRule> = rules
            .iter()
            .filter(|r| intent.contains(&r.pattern.to_lowercase()))
            .collect();

        FactorReport::from_checks(vec![
            CheckResult {
                name: "intent_extraction".to_string(),
                passed: intent_ok,
                detail: format!("intent '{intent}'"),
            },
            CheckResult {
                name: "ape_rules".to_string(),
                passed: violated.is_empty(),
                detail: if violated.is_empty() {
                    format!("{} rules evaluated", rules.len())
                } else {
                    format!(
                        "violates {}",
                        violated
                            .iter()
                            .map(|r| r.id.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                },
            },
        ])
    }

    /// Evaluate an irreversible call.
    ///
    /// `intervals` are the agent's recent response intervals in
    /// milliseconds, used for the covert-channel variance check.
    pub fn evaluate(
        &self,
        ctx: &ValidationContext,
        tool_id: &str,
        args: &serde_json::Value,
        intervals: &[f64],
    ) -> ExtendedReport {
        let identity = self.identity_factor(ctx);
        let signal = self.signal_factor(ctx, intervals);
        let cognitive = self.cognitive_factor(tool_id, args);

        let verdict = if identity.passed && signal.passed && cognitive.passed {
            ExtendedVerdict::Release
        } else if !identity.passed && signal.passed && cognitive.passed {
            ExtendedVerdict::Hold
        } else {
            ExtendedVerdict::Reject
        };

        tracing::info!(
            item_id = %ctx.item_id,
            tool_id = %tool_id,
            identity = identity.passed,
            signal = signal.passed,
            cognitive = cognitive.passed,
            verdict = ?verdict,
            "Extended gate evaluation"
        );

        ExtendedReport {
            identity,
            signal,
            cognitive,
            verdict,
        }
    }
}

/// Coefficient of variation of the samples; `None` below 3 samples.
fn coefficient_of_variation(samples: &[f64]) -> Option<f64> {
    if samples.len() < 3 {
        return None;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if mean == 0.0 {
        return Some(0.0);
    }
    let variance =
        samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    Some(variance.sqrt() / mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attested_gate() -> ExtendedGate {
        let attestor = StaticAttestor::new()
            .enroll_mfaa("agent-1")
            .register_spiffe("tenant-a", "agent-1");
        ExtendedGate::new(Arc::new(attestor))
    }

    fn ctx() -> ValidationContext {
        ValidationContext {
            item_id: "tx-ext".to_string(),
            tenant_id: "tenant-a".to_string(),
            agent_id: "agent-1".to_string(),
            payload: b"transfer summary".to_vec(),
        }
    }

    // Human-ish response intervals: high variance.
    const ORGANIC_INTERVALS: [f64; 5] = [120.0, 480.0, 90.0, 310.0, 640.0];

    #[test]
    fn test_all_factors_pass_releases() {
        let gate = attested_gate();
        let report = gate.evaluate(
            &ctx(),
            "execute_payment",
            &serde_json::json!({"action": "pay invoice"}),
            &ORGANIC_INTERVALS,
        );
        assert_eq!(report.verdict, ExtendedVerdict::Release);
    }

    #[test]
    fn test_identity_only_failure_holds() {
        // Not enrolled anywhere: identity fails, signal and cognition pass.
        let gate = ExtendedGate::new(Arc::new(StaticAttestor::new()));
        let report = gate.evaluate(
            &ctx(),
            "execute_payment",
            &serde_json::json!({"action": "pay invoice"}),
            &ORGANIC_INTERVALS,
        );
        assert!(!report.identity.passed);
        assert!(report.signal.passed);
        assert_eq!(report.verdict, ExtendedVerdict::Hold);
    }

    #[test]
    fn test_metronomic_timing_rejects() {
        let gate = attested_gate();
        // Near-constant intervals: CV below the covert-channel floor.
        let report = gate.evaluate(
            &ctx(),
            "execute_payment",
            &serde_json::json!({"action": "pay invoice"}),
            &[100.0, 101.0, 99.0, 100.0, 100.5],
        );
        assert!(!report.signal.passed);
        assert_eq!(report.verdict, ExtendedVerdict::Reject);
    }

    #[test]
    fn test_ape_rule_violation_rejects() {
        let gate = attested_gate();
        gate.add_rule(ApeRule {
            id: "no-exfil".to_string(),
            pattern: "export all".to_string(),
            description: "bulk export forbidden".to_string(),
        });

        let report = gate.evaluate(
            &ctx(),
            "read_database",
            &serde_json::json!({"action": "export all customer rows"}),
            &ORGANIC_INTERVALS,
        );
        assert!(!report.cognitive.passed);
        assert_eq!(report.verdict, ExtendedVerdict::Reject);
    }

    #[test]
    fn test_baseline_mismatch_rejects() {
        let gate = attested_gate();
        gate.register_baseline(b"the only approved payload");

        let report = gate.evaluate(
            &ctx(),
            "execute_payment",
            &serde_json::json!({"action": "pay"}),
            &ORGANIC_INTERVALS,
        );
        assert!(!report.signal.passed);
        assert_eq!(report.verdict, ExtendedVerdict::Reject);
    }

    #[test]
    fn test_intent_extraction_concatenates() {
        let intent = ExtendedGate::extract_intent(
            "Send_Email",
            &serde_json::json!({"action": "Notify", "to": "Ops Team"}),
        );
        assert!(intent.contains("send_email"));
        assert!(intent.contains("notify"));
        assert!(intent.contains("ops team"));
    }

    #[test]
    fn test_cv_needs_three_samples() {
        assert!(coefficient_of_variation(&[1.0, 2.0]).is_none());
        assert!(coefficient_of_variation(&[1.0, 2.0, 3.0]).is_some());
    }
}
