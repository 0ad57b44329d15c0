//! Tool Classifier
//!
//! Maps `(tool_id, agent_context)` to an escrow policy. Unknown tools fail
//! secure: Class B, minimum reputation 0.95, risk multiplier 5.0, human
//! approval required.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{
    ClassificationRequest, ClassificationResult, ClassifierVerdict, EntitlementCheck,
    EscrowDecision, ToolClass, ToolClassification, TrustCheck,
};

/// Trust floor below which a Ghost-Turn escalates to Atomic-Hold.
const LOW_TRUST_ESCALATION: f64 = 0.50;

/// Argument amount above which a Ghost-Turn escalates to Atomic-Hold.
const HIGH_AMOUNT_ESCALATION: f64 = 10_000.0;

/// The policy engine deciding Class A vs Class B per call.
pub struct ToolClassifier {
    /// Registered tool policies
    registry: RwLock<HashMap<String, ToolClassification>>,
}

impl Default for ToolClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolClassifier {
    /// Create an empty classifier.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Create a classifier pre-seeded with the default tool table.
    pub fn with_defaults() -> Self {
        let classifier = Self::new();
        for tc in default_registry() {
            classifier.register(tc);
        }
        classifier
    }

    /// Upsert a tool classification into the registry.
    pub fn register(&self, classification: ToolClassification) {
        let mut registry = self.registry.write();
        tracing::debug!(
            tool_id = %classification.id,
            class = ?classification.class,
            "Tool classification registered"
        );
        registry.insert(classification.id.clone(), classification);
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Fetch a registered classification.
    pub fn get(&self, tool_id: &str) -> Option<ToolClassification> {
        self.registry.read().get(tool_id).cloned()
    }

    /// Evaluate one call against the registry.
    ///
    /// Pure with respect to the registry snapshot and the request: the same
    /// inputs always yield the same result.
    pub fn classify(&self, req: &ClassificationRequest) -> ClassificationResult {
        let classification = {
            let registry = self.registry.read();
            registry.get(&req.tool_id).cloned()
        };

        let classification = match classification {
            Some(tc) => tc,
            None => {
                tracing::warn!(tool_id = %req.tool_id, "Unknown tool, applying fail-secure default");
                ToolClassification::fail_secure(&req.tool_id)
            }
        };

        // Entitlement check: required ⊆ present.
        let missing: Vec<String> = classification
            .required_entitlements
            .iter()
            .filter(|e| !req.entitlements.contains(*e))
            .cloned()
            .collect();
        let entitlement_check = EntitlementCheck {
            passed: missing.is_empty(),
            missing: missing.clone(),
        };

        // Trust check against the tool's minimum reputation.
        let trust_check = TrustCheck {
            passed: req.trust_score >= classification.min_reputation,
            required: classification.min_reputation,
            actual: req.trust_score,
        };

        let mut escrow_decision = match classification.class {
            ToolClass::A => EscrowDecision::GhostTurn,
            ToolClass::B => EscrowDecision::AtomicHold,
        };
        let mut overrides = Vec::new();

        // Dynamic overrides, in order.
        if req.trust_score < LOW_TRUST_ESCALATION && escrow_decision == EscrowDecision::GhostTurn {
            escrow_decision = EscrowDecision::AtomicHold;
            overrides.push(format!(
                "trust {:.2} < {:.2}: escalated to atomic hold",
                req.trust_score, LOW_TRUST_ESCALATION
            ));
        }

        if let Some(amount) = req.args.get("amount").and_then(|v| v.as_f64()) {
            if amount > HIGH_AMOUNT_ESCALATION && escrow_decision == EscrowDecision::GhostTurn {
                escrow_decision = EscrowDecision::AtomicHold;
                overrides.push(format!(
                    "amount {} > {}: escalated to atomic hold",
                    amount, HIGH_AMOUNT_ESCALATION
                ));
            }
        }

        if !entitlement_check.passed && escrow_decision == EscrowDecision::GhostTurn {
            escrow_decision = EscrowDecision::AtomicHold;
            overrides.push(format!(
                "missing entitlements {:?}: forced atomic hold",
                missing
            ));
        }

        let final_class = match escrow_decision {
            EscrowDecision::GhostTurn => ToolClass::A,
            EscrowDecision::AtomicHold => ToolClass::B,
        };

        let final_verdict = if !entitlement_check.passed || !trust_check.passed {
            ClassifierVerdict::Block
        } else if escrow_decision == EscrowDecision::AtomicHold {
            ClassifierVerdict::Escalate
        } else {
            ClassifierVerdict::Proceed
        };

        // Escalation always pulls in human review.
        let hitl_required =
            classification.hitl_required || final_verdict == ClassifierVerdict::Escalate;

        let result = ClassificationResult {
            tool_id: req.tool_id.clone(),
            class: final_class,
            escrow_decision,
            entitlement_check,
            trust_check,
            overrides,
            final_verdict,
            hitl_required,
            risk_multiplier: classification.risk_multiplier,
        };

        tracing::info!(
            tool_id = %req.tool_id,
            agent_id = %req.agent_id,
            tenant_id = %req.tenant_id,
            verdict = ?result.final_verdict,
            escrow = ?result.escrow_decision,
            trust = req.trust_score,
            overrides = result.overrides.len(),
            "Classification complete"
        );

        result
    }
}

/// Default tool table exercised by the gateway and its tests.
pub fn default_registry() -> Vec<ToolClassification> {
    vec![
        ToolClassification {
            id: "read_database".to_string(),
            class: ToolClass::A,
            reversibility_index: 90,
            min_reputation: 0.30,
            required_entitlements: vec!["data:read".to_string()],
            risk_multiplier: 1.0,
            hitl_required: false,
        },
        ToolClassification {
            id: "draft_document".to_string(),
            class: ToolClass::A,
            reversibility_index: 95,
            min_reputation: 0.20,
            required_entitlements: Vec::new(),
            risk_multiplier: 0.5,
            hitl_required: false,
        },
        ToolClassification {
            id: "send_email".to_string(),
            class: ToolClass::B,
            reversibility_index: 20,
            min_reputation: 0.60,
            required_entitlements: vec!["comms:send".to_string()],
            risk_multiplier: 2.0,
            hitl_required: false,
        },
        ToolClassification {
            id: "execute_payment".to_string(),
            class: ToolClass::B,
            reversibility_index: 5,
            min_reputation: 0.80,
            required_entitlements: vec!["payment:execute".to_string()],
            risk_multiplier: 5.0,
            hitl_required: true,
        },
        ToolClassification {
            id: "delete_records".to_string(),
            class: ToolClass::B,
            reversibility_index: 10,
            min_reputation: 0.75,
            required_entitlements: vec!["data:write".to_string()],
            risk_multiplier: 3.0,
            hitl_required: true,
        },
        ToolClassification {
            id: "admin_config".to_string(),
            class: ToolClass::B,
            reversibility_index: 0,
            min_reputation: 0.90,
            required_entitlements: vec!["admin:config".to_string()],
            risk_multiplier: 5.0,
            hitl_required: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn request(tool: &str, trust: f64, entitlements: &[&str]) -> ClassificationRequest {
        ClassificationRequest {
            tool_id: tool.to_string(),
            agent_id: "agent-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            args: serde_json::json!({}),
            trust_score: trust,
            entitlements: entitlements.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_happy_path_proceeds() {
        let classifier = ToolClassifier::with_defaults();
        let result = classifier.classify(&request("read_database", 0.8, &["data:read"]));

        assert_eq!(result.final_verdict, ClassifierVerdict::Proceed);
        assert_eq!(result.escrow_decision, EscrowDecision::GhostTurn);
        assert_eq!(result.class, ToolClass::A);
        assert!(!result.hitl_required);
        assert!(result.overrides.is_empty());
    }

    #[test]
    fn test_unknown_tool_fails_secure() {
        let classifier = ToolClassifier::with_defaults();
        let result = classifier.classify(&request("summon_demon", 0.9, &[]));

        // Below the 0.95 fail-secure floor: blocked.
        assert_eq!(result.final_verdict, ClassifierVerdict::Block);
        assert!(!result.trust_check.passed);
        assert!((result.trust_check.required - 0.95).abs() < f64::EPSILON);
        assert!((result.risk_multiplier - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_low_trust_escalates_ghost_turn() {
        let classifier = ToolClassifier::with_defaults();
        let result = classifier.classify(&request("read_database", 0.45, &["data:read"]));

        assert_eq!(result.escrow_decision, EscrowDecision::AtomicHold);
        assert_eq!(result.final_verdict, ClassifierVerdict::Escalate);
        assert!(result.hitl_required);
        assert_eq!(result.overrides.len(), 1);
    }

    #[test]
    fn test_high_amount_escalates() {
        let classifier = ToolClassifier::with_defaults();
        let mut req = request("draft_document", 0.9, &[]);
        req.args = serde_json::json!({"amount": 25_000});
        let result = classifier.classify(&req);

        assert_eq!(result.escrow_decision, EscrowDecision::AtomicHold);
        assert_eq!(result.final_verdict, ClassifierVerdict::Escalate);
        assert!(result.hitl_required);
    }

    #[test]
    fn test_missing_entitlement_blocks() {
        let classifier = ToolClassifier::with_defaults();
        let result = classifier.classify(&request("execute_payment", 0.9, &["finance:write"]));

        assert_eq!(result.final_verdict, ClassifierVerdict::Block);
        assert!(!result.entitlement_check.passed);
        assert_eq!(
            result.entitlement_check.missing,
            vec!["payment:execute".to_string()]
        );
    }

    #[test]
    fn test_missing_entitlement_forces_atomic_hold_on_class_a() {
        let classifier = ToolClassifier::with_defaults();
        let result = classifier.classify(&request("read_database", 0.8, &[]));

        // Forced before the BLOCK verdict returns.
        assert_eq!(result.escrow_decision, EscrowDecision::AtomicHold);
        assert_eq!(result.final_verdict, ClassifierVerdict::Block);
    }

    #[test]
    fn test_classify_is_pure() {
        let classifier = ToolClassifier::with_defaults();
        let req = request("read_database", 0.8, &["data:read"]);
        let a = classifier.classify(&req);
        let b = classifier.classify(&req);
        assert_eq!(a.final_verdict, b.final_verdict);
        assert_eq!(a.escrow_decision, b.escrow_decision);
        assert_eq!(a.overrides, b.overrides);
    }

    #[test]
    fn test_register_upserts() {
        let classifier = ToolClassifier::with_defaults();
        let before = classifier.get("read_database").unwrap();
        assert_eq!(before.class, ToolClass::A);

        let mut updated = before.clone();
        updated.class = ToolClass::B;
        classifier.register(updated);

        let after = classifier.get("read_database").unwrap();
        assert_eq!(after.class, ToolClass::B);
    }
}
