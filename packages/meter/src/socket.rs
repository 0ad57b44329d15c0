//! Socket Meter
//!
//! Hot-path metering for every frame crossing the socket boundary. The
//! global counters are lock-free atomics (cost totals stored as f64 bits);
//! per-tenant state sits behind a single RwLock whose holders never do
//! I/O. The billing callback fires outside the lock.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::tenant::TenantMeter;

/// Meter pricing configuration.
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Base credits per 1 KiB frame
    pub base_per_frame: f64,
    /// Risk multipliers by tool class
    pub risk_multipliers: HashMap<String, f64>,
    /// Multiplier for tool classes not in the table
    pub unknown_multiplier: f64,
    /// Evictor cadence
    pub evict_interval: Duration,
    /// Idleness after which a tenant meter is evicted
    pub idle_eviction: Duration,
}

impl Default for MeterConfig {
    fn default() -> Self {
        let mut risk_multipliers = HashMap::new();
        risk_multipliers.insert("admin".to_string(), 5.0);
        risk_multipliers.insert("file_write".to_string(), 3.0);
        risk_multipliers.insert("file_read".to_string(), 1.0);
        risk_multipliers.insert("data_query".to_string(), 1.0);
        risk_multipliers.insert("read_only".to_string(), 0.5);

        Self {
            base_per_frame: 0.001,
            risk_multipliers,
            unknown_multiplier: 2.0,
            evict_interval: Duration::from_secs(600),
            idle_eviction: Duration::from_secs(3600),
        }
    }
}

/// The charge computed for one frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameCharge {
    /// Size-scaled base cost
    pub base_cost: f64,
    /// Tool-class risk multiplier
    pub risk_multiplier: f64,
    /// Trust-weighted discount (or surcharge)
    pub trust_discount: f64,
    /// `base · multiplier · discount`
    pub governance_tax: f64,
    /// `base + tax`
    pub total_cost: f64,
}

/// Billing event emitted per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterBillingEvent {
    /// Tenant charged
    pub tenant_id: String,
    /// Agent that sent the frame
    pub agent_id: String,
    /// Tool class used for the multiplier
    pub tool_class: String,
    /// Frame payload size in bytes
    pub frame_bytes: usize,
    /// The computed charge
    pub charge: FrameCharge,
    /// When the frame was metered
    pub timestamp: DateTime<Utc>,
}

/// Callback for per-frame billing events.
pub type BillingEventCallback = Arc<dyn Fn(&MeterBillingEvent) + Send + Sync>;

/// Snapshot of the global counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeterTotals {
    pub frames: u64,
    pub total_cost: f64,
    pub total_tax: f64,
}

/// The socket meter.
pub struct SocketMeter {
    config: MeterConfig,
    frames: AtomicU64,
    /// f64 stored as bits; eventually consistent for reporting
    total_cost_bits: AtomicU64,
    total_tax_bits: AtomicU64,
    tenants: RwLock<HashMap<String, TenantMeter>>,
    billing_callback: Option<BillingEventCallback>,
    evictor: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

fn atomic_add_f64(cell: &AtomicU64, value: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + value).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

impl SocketMeter {
    /// Create a meter with the given pricing.
    pub fn new(config: MeterConfig) -> Self {
        Self {
            config,
            frames: AtomicU64::new(0),
            total_cost_bits: AtomicU64::new(0f64.to_bits()),
            total_tax_bits: AtomicU64::new(0f64.to_bits()),
            tenants: RwLock::new(HashMap::new()),
            billing_callback: None,
            evictor: Mutex::new(None),
        }
    }

    /// Emit a billing event per frame.
    pub fn with_billing_callback(mut self, callback: BillingEventCallback) -> Self {
        self.billing_callback = Some(callback);
        self
    }

    /// Trust discount tiers.
    fn trust_discount(trust: f64) -> f64 {
        if trust > 0.8 {
            0.70
        } else if trust > 0.6 {
            0.85
        } else if trust < 0.3 {
            1.50
        } else {
            1.0
        }
    }

    /// Risk multiplier for a tool class.
    pub fn risk_multiplier(&self, tool_class: &str) -> f64 {
        self.config
            .risk_multipliers
            .get(tool_class)
            .copied()
            .unwrap_or(self.config.unknown_multiplier)
    }

    /// Meter one frame and return its charge.
    pub fn meter_frame(
        &self,
        tenant_id: &str,
        agent_id: &str,
        tool_class: &str,
        payload_bytes: usize,
        trust: f64,
    ) -> FrameCharge {
        let base_cost = self.config.base_per_frame * payload_bytes.max(1) as f64 / 1024.0;
        let risk_multiplier = self.risk_multiplier(tool_class);
        let trust_discount = Self::trust_discount(trust);
        let governance_tax = base_cost * risk_multiplier * trust_discount;
        let total_cost = base_cost + governance_tax;

        let charge = FrameCharge {
            base_cost,
            risk_multiplier,
            trust_discount,
            governance_tax,
            total_cost,
        };

        self.frames.fetch_add(1, Ordering::Relaxed);
        atomic_add_f64(&self.total_cost_bits, total_cost);
        atomic_add_f64(&self.total_tax_bits, governance_tax);

        {
            let mut tenants = self.tenants.write();
            tenants
                .entry(tenant_id.to_string())
                .or_insert_with(|| TenantMeter::new(tenant_id))
                .record(total_cost, governance_tax);
        }

        if let Some(cb) = &self.billing_callback {
            cb(&MeterBillingEvent {
                tenant_id: tenant_id.to_string(),
                agent_id: agent_id.to_string(),
                tool_class: tool_class.to_string(),
                frame_bytes: payload_bytes,
                charge,
                timestamp: Utc::now(),
            });
        }

        charge
    }

    /// Global counter snapshot.
    pub fn totals(&self) -> MeterTotals {
        MeterTotals {
            frames: self.frames.load(Ordering::Relaxed),
            total_cost: f64::from_bits(self.total_cost_bits.load(Ordering::Relaxed)),
            total_tax: f64::from_bits(self.total_tax_bits.load(Ordering::Relaxed)),
        }
    }

    /// Snapshot of one tenant's meter.
    pub fn tenant(&self, tenant_id: &str) -> Option<TenantMeter> {
        self.tenants.read().get(tenant_id).cloned()
    }

    /// Number of live tenant meters.
    pub fn tenant_count(&self) -> usize {
        self.tenants.read().len()
    }

    /// Evict tenant meters idle longer than the configured threshold.
    pub fn evict_idle(&self) -> usize {
        let idle_secs = self.config.idle_eviction.as_secs() as i64;
        let mut tenants = self.tenants.write();
        let before = tenants.len();
        tenants.retain(|_, meter| meter.idle_seconds() < idle_secs);
        let evicted = before - tenants.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Idle tenant meters evicted");
        }
        evicted
    }

    /// Spawn the idle-meter evictor. Idempotent.
    pub fn start_evictor(self: &Arc<Self>) {
        let mut slot = self.evictor.lock();
        if slot.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let meter = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(meter.config.evict_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        meter.evict_idle();
                    }
                }
            }
            tracing::debug!("Meter evictor stopped");
        });
        *slot = Some((stop_tx, handle));
    }

    /// Stop the evictor loop.
    pub async fn shutdown(&self) {
        let taken = self.evictor.lock().take();
        if let Some((stop, handle)) = taken {
            let _ = stop.send(true);
            let _ = handle.await;
        }
    }
}
