//! Gateway State Arena
//!
//! One object owns every subsystem and hands out access through the shared
//! `Arc`. Subsystems never hold references to each other; the pipeline is
//! the only place their interactions are spelled out.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use praetor_escrow::{CompensationConfig, CompensationStack, DeadLetterMonitor, EscrowLedger};
use praetor_gate::{
    standard_validators, EscrowGate, ExtendedGate, LocalJury, StaticAttestor, ToolClassifier,
};
use praetor_hub::{Hub, HubMessage, SpokeRegistry};
use praetor_meter::{MeterConfig, SocketMeter};
use praetor_sandbox::{EphemeralBackend, GhostPool, PoolBackend, PoolConfig};
use praetor_sentinel::{
    EntitlementConfig, JitEntitlements, JitterConfig, JitterInjector, KillSwitch, RateLimiter,
    RateLimiterConfig,
};
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::reputation::ReputationStore;

/// The arena owning all governance subsystems.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub classifier: ToolClassifier,
    pub gate: EscrowGate,
    pub extended: ExtendedGate,
    pub ledger: EscrowLedger,
    pub compensations: Arc<CompensationStack>,
    pub pool: Arc<GhostPool>,
    pub meter: Arc<SocketMeter>,
    pub hub: Arc<Hub>,
    pub killswitch: KillSwitch,
    pub entitlements: Arc<JitEntitlements>,
    pub limiter: Arc<RateLimiter>,
    pub jitter: JitterInjector,
    pub reputation: ReputationStore,
    pub jury: Arc<LocalJury>,
    /// Receive sides of HTTP-registered spokes, parked until a transport
    /// collects them
    pub spoke_receivers: Mutex<HashMap<String, mpsc::Receiver<HubMessage>>>,
    dead_letter_monitor: Mutex<Option<DeadLetterMonitor>>,
    escrow_reaper: Mutex<Option<(tokio::sync::watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

/// Cadence of the stale-escrow sweep.
const ESCROW_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Holds older than this are expired (expiry counts as a refund).
const ESCROW_MAX_HOLD: Duration = Duration::from_secs(3600);

impl GatewayState {
    /// Build the arena from a config, using the in-memory sandbox backend.
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Self::with_backend(config, Arc::new(EphemeralBackend::new()))
    }

    /// Build the arena over a specific sandbox backend.
    pub fn with_backend(config: GatewayConfig, backend: Arc<dyn PoolBackend>) -> Arc<Self> {
        let jury = Arc::new(LocalJury::new());
        let gate = EscrowGate::new(standard_validators(
            config.entropy_url.clone(),
            jury.clone(),
        ));

        let pool = GhostPool::new(
            backend,
            PoolConfig {
                min_idle: config.pool_min_idle,
                max_capacity: config.pool_max_capacity,
                ..PoolConfig::default()
            },
        );

        let mut meter_config = MeterConfig {
            base_per_frame: config.meter_base_cost,
            ..MeterConfig::default()
        };
        meter_config
            .risk_multipliers
            .extend(config.meter_risk_multipliers.clone());
        let meter = Arc::new(SocketMeter::new(meter_config));

        let hub = Arc::new(Hub::new(Arc::new(SpokeRegistry::new())));

        let entitlements = Arc::new(JitEntitlements::new(EntitlementConfig {
            max_ttl: Duration::from_secs(config.jit_max_ttl_secs),
            ..EntitlementConfig::default()
        }));

        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            max_per_min: config.rate_limit_max_per_min,
            ..RateLimiterConfig::default()
        }));

        let jitter = JitterInjector::new(JitterConfig {
            min_ms: config.jitter_min_ms,
            max_ms: config.jitter_max_ms,
            ..JitterConfig::default()
        });

        Arc::new(Self {
            classifier: ToolClassifier::with_defaults(),
            gate,
            extended: ExtendedGate::new(Arc::new(StaticAttestor::new())),
            ledger: EscrowLedger::new(),
            compensations: Arc::new(CompensationStack::new(CompensationConfig::default())),
            pool,
            meter,
            hub,
            killswitch: KillSwitch::new(),
            entitlements,
            limiter,
            jitter,
            reputation: ReputationStore::default(),
            jury,
            spoke_receivers: Mutex::new(HashMap::new()),
            dead_letter_monitor: Mutex::new(None),
            escrow_reaper: Mutex::new(None),
            config,
        })
    }

    /// Start every background loop (pool maintainer, meter evictor, JIT
    /// reaper, limiter GC, dead-letter monitor). Idempotent.
    pub fn start_background(self: &Arc<Self>) {
        self.pool.start_maintainer();
        self.meter.start_evictor();
        self.entitlements.start_reaper();
        self.limiter.start_gc();

        {
            let mut monitor = self.dead_letter_monitor.lock();
            if monitor.is_none() {
                *monitor = Some(DeadLetterMonitor::spawn(
                    self.compensations.clone(),
                    Duration::from_secs(60),
                ));
            }
        }

        {
            let mut reaper = self.escrow_reaper.lock();
            if reaper.is_none() {
                let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
                let state = self.clone();
                let handle = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(ESCROW_SWEEP_INTERVAL);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = stop_rx.changed() => break,
                            _ = ticker.tick() => {
                                let expired = state.ledger.expire_stale(ESCROW_MAX_HOLD);
                                if !expired.is_empty() {
                                    tracing::warn!(count = expired.len(), "Stale escrow holds expired");
                                }
                            }
                        }
                    }
                    tracing::debug!("Escrow reaper stopped");
                });
                *reaper = Some((stop_tx, handle));
            }
        }

        tracing::info!("Gateway background loops started");
    }

    /// Close every stop channel and wait for the loops to exit.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.meter.shutdown().await;
        self.entitlements.shutdown().await;
        self.limiter.shutdown().await;

        let monitor = self.dead_letter_monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.shutdown().await;
        }

        let reaper = self.escrow_reaper.lock().take();
        if let Some((stop, handle)) = reaper {
            let _ = stop.send(true);
            let _ = handle.await;
        }

        tracing::info!("Gateway background loops stopped");
    }
}
