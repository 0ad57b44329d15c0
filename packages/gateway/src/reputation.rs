//! Agent Reputation Store
//!
//! In-memory only: scores live for the lifetime of the gateway process and
//! are seeded at startup. There is deliberately no database handle here;
//! deployments that need durable reputation put a store behind the same
//! surface.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Score drift applied on governance outcomes.
const ALLOW_DRIFT: f64 = 0.01;
const BLOCK_DRIFT: f64 = -0.05;

/// Reputation snapshot returned over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    /// Trust score [0, 1]
    pub score: f64,
    /// Named tier derived from the score
    pub tier: String,
}

/// The in-memory reputation store.
pub struct ReputationStore {
    scores: RwLock<HashMap<String, f64>>,
    default_score: f64,
}

impl Default for ReputationStore {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl ReputationStore {
    /// Create a store; unknown agents start at `default_score`.
    pub fn new(default_score: f64) -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            default_score: default_score.clamp(0.0, 1.0),
        }
    }

    /// Current score for an agent.
    pub fn score(&self, agent_id: &str) -> f64 {
        self.scores
            .read()
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_score)
    }

    /// Set an agent's score directly.
    pub fn set_score(&self, agent_id: &str, score: f64) {
        self.scores
            .write()
            .insert(agent_id.to_string(), score.clamp(0.0, 1.0));
    }

    /// Drift the score after a governance outcome.
    pub fn record_outcome(&self, agent_id: &str, allowed: bool) -> f64 {
        let drift = if allowed { ALLOW_DRIFT } else { BLOCK_DRIFT };
        let mut scores = self.scores.write();
        let entry = scores
            .entry(agent_id.to_string())
            .or_insert(self.default_score);
        *entry = (*entry + drift).clamp(0.0, 1.0);
        *entry
    }

    /// Tier name for a score.
    pub fn tier(score: f64) -> &'static str {
        if score >= 0.9 {
            "platinum"
        } else if score >= 0.75 {
            "gold"
        } else if score >= 0.5 {
            "silver"
        } else if score >= 0.25 {
            "bronze"
        } else {
            "untrusted"
        }
    }

    /// Snapshot for the reputation endpoint.
    pub fn reputation(&self, agent_id: &str) -> Reputation {
        let score = self.score(agent_id);
        Reputation {
            score,
            tier: Self::tier(score).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_agent_gets_default() {
        let store = ReputationStore::new(0.5);
        assert!((store.score("stranger") - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tiers() {
        assert_eq!(ReputationStore::tier(0.95), "platinum");
        assert_eq!(ReputationStore::tier(0.8), "gold");
        assert_eq!(ReputationStore::tier(0.6), "silver");
        assert_eq!(ReputationStore::tier(0.3), "bronze");
        assert_eq!(ReputationStore::tier(0.1), "untrusted");
    }

    #[test]
    fn test_outcome_drift() {
        let store = ReputationStore::new(0.5);
        store.record_outcome("agent-1", true);
        assert!((store.score("agent-1") - 0.51).abs() < 1e-9);

        store.record_outcome("agent-1", false);
        assert!((store.score("agent-1") - 0.46).abs() < 1e-9);
    }

    #[test]
    fn test_score_clamped() {
        let store = ReputationStore::new(0.5);
        store.set_score("agent-1", 1.7);
        assert!((store.score("agent-1") - 1.0).abs() < f64::EPSILON);

        store.set_score("agent-1", 0.01);
        store.record_outcome("agent-1", false);
        assert!(store.score("agent-1") >= 0.0);
    }
}
