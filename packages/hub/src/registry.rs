//! Spoke Registry
//!
//! Tracks connected spokes and their bounded send channels. Registration
//! hands the caller a handle owning the receive side; dropping the handle
//! does not deregister (disconnect is explicit, mirroring the gateway's
//! connection lifecycle).

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{HubMessage, SpokeDescriptor};

/// Default bound of a spoke's send channel.
pub const DEFAULT_SPOKE_CHANNEL_CAPACITY: usize = 64;

pub(crate) struct SpokeEntry {
    pub descriptor: SpokeDescriptor,
    pub sender: mpsc::Sender<HubMessage>,
}

/// Handle returned to a registering spoke.
pub struct SpokeHandle {
    /// The registered descriptor
    pub descriptor: SpokeDescriptor,
    /// Receive side of the spoke's channel
    pub receiver: mpsc::Receiver<HubMessage>,
}

/// Registry of connected spokes.
pub struct SpokeRegistry {
    spokes: RwLock<HashMap<String, SpokeEntry>>,
    channel_capacity: usize,
}

impl Default for SpokeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpokeRegistry {
    /// Create a registry with the default channel bound.
    pub fn new() -> Self {
        Self {
            spokes: RwLock::new(HashMap::new()),
            channel_capacity: DEFAULT_SPOKE_CHANNEL_CAPACITY,
        }
    }

    /// Override the per-spoke channel bound.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Register a spoke and return its handle.
    pub fn register(
        &self,
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        capabilities: Vec<String>,
        trust: f64,
        entitlements: HashSet<String>,
    ) -> SpokeHandle {
        let descriptor = SpokeDescriptor {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            capabilities,
            trust,
            entitlements,
            connected_at: Utc::now(),
        };

        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        {
            let mut spokes = self.spokes.write();
            spokes.insert(
                descriptor.id.clone(),
                SpokeEntry {
                    descriptor: descriptor.clone(),
                    sender,
                },
            );
        }

        tracing::info!(
            spoke_id = %descriptor.id,
            tenant_id = %descriptor.tenant_id,
            agent_id = %descriptor.agent_id,
            capabilities = ?descriptor.capabilities,
            "Spoke registered"
        );

        SpokeHandle {
            descriptor,
            receiver,
        }
    }

    /// Remove a spoke on disconnect.
    pub fn deregister(&self, spoke_id: &str) -> bool {
        let removed = self.spokes.write().remove(spoke_id).is_some();
        if removed {
            tracing::info!(spoke_id = %spoke_id, "Spoke deregistered");
        }
        removed
    }

    /// Descriptors of all connected spokes.
    pub fn list(&self) -> Vec<SpokeDescriptor> {
        self.spokes
            .read()
            .values()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Number of connected spokes.
    pub fn len(&self) -> usize {
        self.spokes.read().len()
    }

    /// Whether no spokes are connected.
    pub fn is_empty(&self) -> bool {
        self.spokes.read().is_empty()
    }

    /// Snapshot of `(descriptor, sender)` pairs for the router's O(n) scan.
    pub(crate) fn entries(&self) -> Vec<(SpokeDescriptor, mpsc::Sender<HubMessage>)> {
        self.spokes
            .read()
            .values()
            .map(|e| (e.descriptor.clone(), e.sender.clone()))
            .collect()
    }
}
