//! Kill Switch
//!
//! Emergency halt for a rogue agent or an entire tenant. `is_killed` is an
//! O(1) map lookup on the hot path; expired records are purged lazily when
//! they are next consulted. Every kill is appended to an audit history.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Scope of a kill record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillScope {
    /// Single agent
    Agent,
    /// Every agent in a tenant
    Tenant,
}

/// Record of an emergency halt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillRecord {
    /// Kill id
    pub id: Uuid,
    /// Agent or tenant id
    pub target: String,
    /// Scope of the halt
    pub scope: KillScope,
    /// Operator-supplied reason
    pub reason: String,
    /// When the kill was issued
    pub killed_at: DateTime<Utc>,
    /// When the kill lapses; `None` is permanent
    pub expires_at: Option<DateTime<Utc>>,
    /// Operator who initiated, if known
    pub initiated_by: Option<String>,
}

impl KillRecord {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// The kill switch.
pub struct KillSwitch {
    killed_agents: RwLock<HashMap<String, KillRecord>>,
    killed_tenants: RwLock<HashMap<String, KillRecord>>,
    history: RwLock<Vec<KillRecord>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    /// Create an idle kill switch.
    pub fn new() -> Self {
        Self {
            killed_agents: RwLock::new(HashMap::new()),
            killed_tenants: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    fn record(
        target: &str,
        scope: KillScope,
        reason: &str,
        ttl: Option<Duration>,
        initiated_by: Option<String>,
    ) -> KillRecord {
        KillRecord {
            id: Uuid::new_v4(),
            target: target.to_string(),
            scope,
            reason: reason.to_string(),
            killed_at: Utc::now(),
            expires_at: ttl
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d),
            initiated_by,
        }
    }

    /// Halt a single agent.
    pub fn kill_agent(
        &self,
        agent_id: &str,
        reason: &str,
        ttl: Option<Duration>,
        initiated_by: Option<String>,
    ) -> KillRecord {
        let record = Self::record(agent_id, KillScope::Agent, reason, ttl, initiated_by);
        self.killed_agents
            .write()
            .insert(agent_id.to_string(), record.clone());
        self.history.write().push(record.clone());

        tracing::warn!(
            agent_id = %agent_id,
            reason = %reason,
            expires_at = ?record.expires_at,
            "Agent killed"
        );
        record
    }

    /// Halt every agent in a tenant.
    pub fn kill_tenant(
        &self,
        tenant_id: &str,
        reason: &str,
        ttl: Option<Duration>,
        initiated_by: Option<String>,
    ) -> KillRecord {
        let record = Self::record(tenant_id, KillScope::Tenant, reason, ttl, initiated_by);
        self.killed_tenants
            .write()
            .insert(tenant_id.to_string(), record.clone());
        self.history.write().push(record.clone());

        tracing::error!(
            tenant_id = %tenant_id,
            reason = %reason,
            expires_at = ?record.expires_at,
            "Tenant killed"
        );
        record
    }

    fn check(map: &RwLock<HashMap<String, KillRecord>>, key: &str) -> Option<KillRecord> {
        let expired = {
            let records = map.read();
            match records.get(key) {
                Some(record) if record.expired() => true,
                Some(record) => return Some(record.clone()),
                None => return None,
            }
        };

        if expired {
            // Lazy purge on expiry.
            map.write().remove(key);
        }
        None
    }

    /// Active kill record covering the agent or its tenant, if any.
    pub fn active_kill(&self, agent_id: &str, tenant_id: &str) -> Option<KillRecord> {
        Self::check(&self.killed_tenants, tenant_id)
            .or_else(|| Self::check(&self.killed_agents, agent_id))
    }

    /// O(1) hot-path check.
    pub fn is_killed(&self, agent_id: &str, tenant_id: &str) -> bool {
        self.active_kill(agent_id, tenant_id).is_some()
    }

    /// Lift a kill before its TTL.
    pub fn revive(&self, target: &str, scope: KillScope) -> bool {
        let removed = match scope {
            KillScope::Agent => self.killed_agents.write().remove(target).is_some(),
            KillScope::Tenant => self.killed_tenants.write().remove(target).is_some(),
        };
        if removed {
            tracing::warn!(target = %target, scope = ?scope, "Kill lifted");
        }
        removed
    }

    /// Full kill history, including lapsed records.
    pub fn history(&self) -> Vec<KillRecord> {
        self.history.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kill() {
        let ks = KillSwitch::new();
        assert!(!ks.is_killed("agent-1", "tenant-a"));

        ks.kill_agent("agent-1", "rogue behavior", None, None);
        assert!(ks.is_killed("agent-1", "tenant-a"));
        assert!(!ks.is_killed("agent-2", "tenant-a"));
    }

    #[test]
    fn test_tenant_kill_covers_all_agents() {
        let ks = KillSwitch::new();
        ks.kill_tenant("tenant-a", "billing fraud", None, Some("operator-9".to_string()));

        assert!(ks.is_killed("agent-1", "tenant-a"));
        assert!(ks.is_killed("agent-2", "tenant-a"));
        assert!(!ks.is_killed("agent-1", "tenant-b"));

        let record = ks.active_kill("agent-1", "tenant-a").unwrap();
        assert_eq!(record.scope, KillScope::Tenant);
        assert_eq!(record.initiated_by.as_deref(), Some("operator-9"));
    }

    #[test]
    fn test_expired_kill_lazily_purged() {
        let ks = KillSwitch::new();
        ks.kill_agent("agent-1", "timeout", Some(Duration::from_secs(0)), None);

        // Already expired: purged on the next check.
        assert!(!ks.is_killed("agent-1", "tenant-a"));
        assert!(ks.killed_agents.read().is_empty());
        // History still remembers it.
        assert_eq!(ks.history().len(), 1);
    }

    #[test]
    fn test_revive() {
        let ks = KillSwitch::new();
        ks.kill_agent("agent-1", "suspicious", None, None);
        assert!(ks.revive("agent-1", KillScope::Agent));
        assert!(!ks.is_killed("agent-1", "tenant-a"));
        assert!(!ks.revive("agent-1", KillScope::Agent));
    }

    #[test]
    fn test_ttl_kill_still_active_before_expiry() {
        let ks = KillSwitch::new();
        ks.kill_agent("agent-1", "cooldown", Some(Duration::from_secs(3600)), None);
        assert!(ks.is_killed("agent-1", "tenant-a"));
    }
}
