//! JIT Entitlements
//!
//! Ephemeral `(agent, permission)` grants with a TTL capped at one hour.
//! A background reaper marks expired grants every 10 seconds; revocation
//! is immediate. Every GRANT / EXPIRE / REVOKE fires the audit callback.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Hard cap on any grant's TTL.
pub const MAX_TTL: Duration = Duration::from_secs(3600);

/// Entitlement errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntitlementError {
    #[error("no active grant of '{permission}' for agent {agent_id}")]
    NotGranted { agent_id: String, permission: String },
}

/// Grant lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementStatus {
    Active,
    Expired,
    Revoked,
}

/// One time-bounded permission grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitEntitlement {
    /// Grant id
    pub id: Uuid,
    /// Agent holding the permission
    pub agent_id: String,
    /// The permission string (e.g. "data:read")
    pub permission: String,
    /// When the grant was issued
    pub granted_at: DateTime<Utc>,
    /// When the grant lapses
    pub expires_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: EntitlementStatus,
}

impl JitEntitlement {
    fn lapsed(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementAudit {
    Grant,
    Expire,
    Revoke,
}

/// Callback fired on every audit event.
pub type AuditCallback = Arc<dyn Fn(&JitEntitlement, EntitlementAudit) + Send + Sync>;

/// Reaper and TTL policy.
#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    /// Cap applied to requested TTLs (itself capped at [`MAX_TTL`])
    pub max_ttl: Duration,
    /// Reaper cadence
    pub reap_interval: Duration,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            max_ttl: MAX_TTL,
            reap_interval: Duration::from_secs(10),
        }
    }
}

/// The JIT entitlement store.
pub struct JitEntitlements {
    config: EntitlementConfig,
    grants: RwLock<HashMap<(String, String), JitEntitlement>>,
    audit_callback: Option<AuditCallback>,
    reaper: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

impl Default for JitEntitlements {
    fn default() -> Self {
        Self::new(EntitlementConfig::default())
    }
}

impl JitEntitlements {
    /// Create a store with the given policy; the configured max TTL is
    /// clamped to the one-hour hard cap.
    pub fn new(mut config: EntitlementConfig) -> Self {
        config.max_ttl = config.max_ttl.min(MAX_TTL);
        Self {
            config,
            grants: RwLock::new(HashMap::new()),
            audit_callback: None,
            reaper: Mutex::new(None),
        }
    }

    /// Fire the callback on GRANT / EXPIRE / REVOKE.
    pub fn with_audit_callback(mut self, callback: AuditCallback) -> Self {
        self.audit_callback = Some(callback);
        self
    }

    fn audit(&self, grant: &JitEntitlement, event: EntitlementAudit) {
        if let Some(cb) = &self.audit_callback {
            cb(grant, event);
        }
    }

    /// Grant a permission; the TTL is capped by policy. Re-granting an
    /// existing pair refreshes it.
    pub fn grant(&self, agent_id: &str, permission: &str, ttl: Duration) -> JitEntitlement {
        let ttl = ttl.min(self.config.max_ttl);
        let now = Utc::now();
        let grant = JitEntitlement {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            permission: permission.to_string(),
            granted_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1)),
            status: EntitlementStatus::Active,
        };

        self.grants.write().insert(
            (agent_id.to_string(), permission.to_string()),
            grant.clone(),
        );

        tracing::info!(
            agent_id = %agent_id,
            permission = %permission,
            ttl_secs = ttl.as_secs(),
            "JIT entitlement granted"
        );
        self.audit(&grant, EntitlementAudit::Grant);
        grant
    }

    /// Whether the agent currently holds the permission.
    pub fn check(&self, agent_id: &str, permission: &str) -> bool {
        let grants = self.grants.read();
        grants
            .get(&(agent_id.to_string(), permission.to_string()))
            .is_some_and(|g| g.status == EntitlementStatus::Active && !g.lapsed())
    }

    /// Id of the agent's active grant of a permission, if any.
    pub fn grant_id(&self, agent_id: &str, permission: &str) -> Option<Uuid> {
        let grants = self.grants.read();
        grants
            .get(&(agent_id.to_string(), permission.to_string()))
            .filter(|g| g.status == EntitlementStatus::Active && !g.lapsed())
            .map(|g| g.id)
    }

    /// All permissions the agent actively holds.
    pub fn active_permissions(&self, agent_id: &str) -> HashSet<String> {
        self.grants
            .read()
            .values()
            .filter(|g| {
                g.agent_id == agent_id && g.status == EntitlementStatus::Active && !g.lapsed()
            })
            .map(|g| g.permission.clone())
            .collect()
    }

    /// Revoke a grant immediately.
    pub fn revoke(&self, agent_id: &str, permission: &str) -> Result<(), EntitlementError> {
        let revoked = {
            let mut grants = self.grants.write();
            match grants.get_mut(&(agent_id.to_string(), permission.to_string())) {
                Some(grant) if grant.status == EntitlementStatus::Active => {
                    grant.status = EntitlementStatus::Revoked;
                    Some(grant.clone())
                }
                _ => None,
            }
        };

        match revoked {
            Some(grant) => {
                tracing::warn!(
                    agent_id = %agent_id,
                    permission = %permission,
                    "JIT entitlement revoked"
                );
                self.audit(&grant, EntitlementAudit::Revoke);
                Ok(())
            }
            None => Err(EntitlementError::NotGranted {
                agent_id: agent_id.to_string(),
                permission: permission.to_string(),
            }),
        }
    }

    /// Mark lapsed active grants as expired; returns how many.
    pub fn reap(&self) -> usize {
        let expired: Vec<JitEntitlement> = {
            let mut grants = self.grants.write();
            grants
                .values_mut()
                .filter(|g| g.status == EntitlementStatus::Active && g.lapsed())
                .map(|g| {
                    g.status = EntitlementStatus::Expired;
                    g.clone()
                })
                .collect()
        };

        for grant in &expired {
            tracing::debug!(
                agent_id = %grant.agent_id,
                permission = %grant.permission,
                "JIT entitlement expired"
            );
            self.audit(grant, EntitlementAudit::Expire);
        }
        expired.len()
    }

    /// Spawn the background reaper. Idempotent.
    pub fn start_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock();
        if slot.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let store = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.reap_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        store.reap();
                    }
                }
            }
            tracing::debug!("Entitlement reaper stopped");
        });
        *slot = Some((stop_tx, handle));
    }

    /// Stop the reaper loop.
    pub async fn shutdown(&self) {
        let taken = self.reaper.lock().take();
        if let Some((stop, handle)) = taken {
            let _ = stop.send(true);
            let _ = handle.await;
        }
    }
}
