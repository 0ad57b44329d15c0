//! Hub Core Types
//!
//! Messages routed through the hub and the spoke descriptors they are
//! matched against. A destination is either a concrete virtual address or
//! a `cap://` capability selector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// System event categories carried by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Governance verdict for a transaction
    Verdict,
    /// Agent trust score changed
    TrustChange,
    /// Spoke connected or disconnected
    SpokeLifecycle,
    /// Kill switch fired
    Kill,
    /// Application-defined event
    Custom(String),
}

/// Where a message should go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// A concrete spoke id or agent virtual address
    Address(String),
    /// All spokes advertising the capability (`cap://<name>`)
    Capability(String),
    /// Every spoke in the tenant
    Broadcast,
}

impl Destination {
    /// Parse a destination string; `cap://` selects by capability.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("cap://") {
            Some(cap) => Self::Capability(cap.to_string()),
            None if raw == "*" => Self::Broadcast,
            None => Self::Address(raw.to_string()),
        }
    }
}

/// One routed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    /// Message id
    pub id: String,
    /// Event category
    pub msg_type: MessageType,
    /// Originating component or agent
    pub source: String,
    /// Routing target
    pub destination: Destination,
    /// Tenant scope; spokes only see their own tenant's events
    pub tenant_id: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Entitlement a spoke must hold to receive this message
    pub required_entitlement: Option<String>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Seconds the message stays deliverable
    pub ttl_secs: u64,
}

impl HubMessage {
    /// Create a message bound for a destination.
    pub fn new(
        msg_type: MessageType,
        source: impl Into<String>,
        destination: Destination,
        tenant_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            msg_type,
            source: source.into(),
            destination,
            tenant_id: tenant_id.into(),
            payload,
            required_entitlement: None,
            timestamp: Utc::now(),
            ttl_secs: 60,
        }
    }

    /// Require spokes to hold an entitlement.
    pub fn with_required_entitlement(mut self, entitlement: impl Into<String>) -> Self {
        self.required_entitlement = Some(entitlement.into());
        self
    }

    /// Override the TTL.
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Whether the message has outlived its TTL.
    pub fn expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.timestamp);
        age.num_seconds() >= self.ttl_secs as i64
    }
}

/// Descriptor of a registered spoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpokeDescriptor {
    /// Spoke id
    pub id: String,
    /// Tenant the spoke belongs to
    pub tenant_id: String,
    /// Agent behind the spoke
    pub agent_id: String,
    /// Capabilities the spoke advertises
    pub capabilities: Vec<String>,
    /// Spoke trust score
    pub trust: f64,
    /// Entitlements the spoke holds
    pub entitlements: HashSet<String>,
    /// Registration time
    pub connected_at: DateTime<Utc>,
}
