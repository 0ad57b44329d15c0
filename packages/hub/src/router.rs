//! Hub Router
//!
//! O(n) fan-out: one scan over the spoke table per message, matching
//! destination, tenant and entitlements. Delivery is fire-and-forget into
//! each spoke's bounded channel; a full channel increments the dropped
//! counter instead of blocking the router.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::registry::SpokeRegistry;
use crate::types::{Destination, HubMessage, SpokeDescriptor};

/// Samples kept for the rolling routing-latency average.
const LATENCY_WINDOW: usize = 256;

/// Router errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("message {0} expired before routing")]
    Expired(String),
}

/// Outcome of routing one message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteOutcome {
    /// Spokes that matched the selection policy
    pub matched: usize,
    /// Messages enqueued
    pub delivered: usize,
    /// Messages dropped on full channels
    pub dropped: usize,
}

/// Snapshot of hub metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HubMetrics {
    /// Messages routed (at least one delivery)
    pub messages_routed: u64,
    /// Messages that matched no spoke or expired
    pub messages_failed: u64,
    /// Deliveries dropped on full channels
    pub messages_dropped: u64,
    /// Connected spokes
    pub spokes_connected: usize,
    /// Rolling average routing latency in microseconds
    pub avg_routing_latency_us: f64,
}

/// The hub router over a spoke registry.
pub struct Hub {
    registry: Arc<SpokeRegistry>,
    routed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    latencies_us: Mutex<VecDeque<u64>>,
}

impl Hub {
    /// Create a hub over a registry.
    pub fn new(registry: Arc<SpokeRegistry>) -> Self {
        Self {
            registry,
            routed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            latencies_us: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    /// The registry behind this hub.
    pub fn registry(&self) -> &Arc<SpokeRegistry> {
        &self.registry
    }

    fn matches(msg: &HubMessage, spoke: &SpokeDescriptor) -> bool {
        if spoke.tenant_id != msg.tenant_id {
            return false;
        }

        if let Some(required) = &msg.required_entitlement {
            if !spoke.entitlements.contains(required) {
                return false;
            }
        }

        match &msg.destination {
            Destination::Address(addr) => spoke.id == *addr || spoke.agent_id == *addr,
            Destination::Capability(cap) => spoke.capabilities.iter().any(|c| c == cap),
            Destination::Broadcast => true,
        }
    }

    /// Route a message to every matching spoke.
    pub fn route(&self, msg: HubMessage) -> Result<RouteOutcome, HubError> {
        let start = Instant::now();

        if msg.expired() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(HubError::Expired(msg.id));
        }

        let mut matched = 0;
        let mut delivered = 0;
        let mut dropped = 0;

        for (descriptor, sender) in self.registry.entries() {
            if !Self::matches(&msg, &descriptor) {
                continue;
            }
            matched += 1;

            match sender.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    dropped += 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        message_id = %msg.id,
                        spoke_id = %descriptor.id,
                        "Spoke channel full, message dropped"
                    );
                }
            }
        }

        if delivered > 0 {
            self.routed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let latency_us = start.elapsed().as_micros() as u64;
        {
            let mut window = self.latencies_us.lock();
            if window.len() == LATENCY_WINDOW {
                window.pop_front();
            }
            window.push_back(latency_us);
        }

        tracing::debug!(
            message_id = %msg.id,
            msg_type = ?msg.msg_type,
            matched,
            delivered,
            dropped,
            latency_us,
            "Message routed"
        );

        Ok(RouteOutcome {
            matched,
            delivered,
            dropped,
        })
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> HubMetrics {
        let avg = {
            let window = self.latencies_us.lock();
            if window.is_empty() {
                0.0
            } else {
                window.iter().sum::<u64>() as f64 / window.len() as f64
            }
        };

        HubMetrics {
            messages_routed: self.routed.load(Ordering::Relaxed),
            messages_failed: self.failed.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
            spokes_connected: self.registry.len(),
            avg_routing_latency_us: avg,
        }
    }
}
