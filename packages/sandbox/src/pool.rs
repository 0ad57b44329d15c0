//! Ghost Container Pool
//!
//! A warm pool of disposable sandboxes. `get` leases from the idle queue
//! and stamps the tenant label; `put` scrubs asynchronously and only
//! re-offers the container once the label is erased. A maintainer loop
//! tops the pool up every 2 seconds.
//!
//! Invariants: `available + active <= max_capacity`; at steady state
//! `available >= min_idle`; a container is single-tenant at any instant.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::backend::{PoolBackend, PoolError};

/// Pool sizing and scrub policy.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle containers the maintainer keeps warm
    pub min_idle: usize,
    /// Hard cap on live containers (available + active)
    pub max_capacity: usize,
    /// Maintainer cadence
    pub maintain_interval: Duration,
    /// Command run inside the container to scrub state between tenants
    pub scrub_command: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 2,
            max_capacity: 8,
            maintain_interval: Duration::from_secs(2),
            scrub_command: vec!["scrub".to_string(), "--all".to_string()],
        }
    }
}

/// A pooled sandbox instance.
#[derive(Debug, Clone)]
pub struct GhostContainer {
    /// Pool-side id
    pub id: String,
    /// Backend runtime handle
    pub backend_id: String,
    /// Leasing tenant; `None` while idle
    pub tenant: Option<String>,
    /// Last checkout or scrub time
    pub last_used: DateTime<Utc>,
}

/// The ghost container pool.
pub struct GhostPool {
    backend: Arc<dyn PoolBackend>,
    config: PoolConfig,
    idle_tx: mpsc::Sender<GhostContainer>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<GhostContainer>>,
    /// available + active
    total: AtomicUsize,
    /// Containers waiting in the idle queue
    available: AtomicUsize,
    maintainer: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

impl GhostPool {
    /// Create a pool over a backend. Call
    /// [`GhostPool::start_maintainer`] to begin topping it up.
    pub fn new(backend: Arc<dyn PoolBackend>, config: PoolConfig) -> Arc<Self> {
        let (idle_tx, idle_rx) = mpsc::channel(config.max_capacity.max(1));
        Arc::new(Self {
            backend,
            config,
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            total: AtomicUsize::new(0),
            available: AtomicUsize::new(0),
            maintainer: Mutex::new(None),
        })
    }

    /// Spawn the maintainer loop. Idempotent.
    pub fn start_maintainer(self: &Arc<Self>) {
        let mut slot = self.maintainer.lock();
        if slot.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.maintain_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = pool.top_up().await {
                            tracing::warn!(error = %e, "Pool top-up failed");
                        }
                    }
                }
            }
            tracing::debug!("Pool maintainer stopped");
        });
        *slot = Some((stop_tx, handle));
    }

    /// Stop the maintainer loop.
    pub async fn shutdown(&self) {
        let taken = self.maintainer.lock().take();
        if let Some((stop, handle)) = taken {
            let _ = stop.send(true);
            let _ = handle.await;
        }
    }

    /// Provision containers until `available >= min_idle`, bounded by
    /// `max_capacity`.
    pub async fn top_up(&self) -> Result<usize, PoolError> {
        let mut created = 0;
        while self.available.load(Ordering::SeqCst) < self.config.min_idle
            && self.total.load(Ordering::SeqCst) < self.config.max_capacity
        {
            let backend_id = self.backend.create().await?;
            self.backend.start(&backend_id).await?;

            let container = GhostContainer {
                id: Uuid::new_v4().to_string(),
                backend_id,
                tenant: None,
                last_used: Utc::now(),
            };

            self.total.fetch_add(1, Ordering::SeqCst);
            self.available.fetch_add(1, Ordering::SeqCst);
            if self.idle_tx.send(container).await.is_err() {
                self.total.fetch_sub(1, Ordering::SeqCst);
                self.available.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolError::Closed);
            }
            created += 1;
        }

        if created > 0 {
            tracing::debug!(
                created,
                available = self.available.load(Ordering::SeqCst),
                total = self.total.load(Ordering::SeqCst),
                "Pool topped up"
            );
        }
        Ok(created)
    }

    /// Lease a container for a tenant, blocking until one is idle or the
    /// deadline passes.
    pub async fn get(&self, tenant: &str, deadline: Duration) -> Result<GhostContainer, PoolError> {
        let mut rx = self.idle_rx.lock().await;
        match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(mut container)) => {
                drop(rx);
                self.available.fetch_sub(1, Ordering::SeqCst);
                // Tenant label is replaced on checkout.
                container.tenant = Some(tenant.to_string());
                container.last_used = Utc::now();
                tracing::debug!(
                    container_id = %container.id,
                    tenant = %tenant,
                    "Ghost container leased"
                );
                Ok(container)
            }
            Ok(None) => Err(PoolError::Closed),
            Err(_) => Err(PoolError::Exhausted),
        }
    }

    /// Run a command speculatively inside a leased container, returning the
    /// combined stdout/stderr.
    pub async fn execute_speculative(
        &self,
        container: &GhostContainer,
        cmd: &[String],
        payload: &[u8],
    ) -> Result<String, PoolError> {
        let output = self
            .backend
            .exec(&container.backend_id, cmd, payload)
            .await?;
        tracing::debug!(
            container_id = %container.id,
            command = %cmd.join(" "),
            stdout_bytes = output.stdout.len(),
            "Speculative execution complete"
        );
        Ok(output.combined())
    }

    /// Return a container to the pool. The scrub runs asynchronously; the
    /// container is destroyed if the scrub fails and is only re-offered
    /// with the tenant label erased.
    pub fn put(self: &Arc<Self>, container: GhostContainer) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.scrub_and_return(container).await;
        });
    }

    async fn scrub_and_return(&self, mut container: GhostContainer) {
        match self
            .backend
            .exec(&container.backend_id, &self.config.scrub_command, b"")
            .await
        {
            Ok(_) => {
                container.tenant = None;
                container.last_used = Utc::now();
                self.available.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(container_id = %container.id, "Ghost container scrubbed");
                if self.idle_tx.send(container).await.is_err() {
                    self.available.fetch_sub(1, Ordering::SeqCst);
                    self.total.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Err(e) => {
                tracing::warn!(
                    container_id = %container.id,
                    error = %e,
                    "Scrub failed, destroying container"
                );
                if let Err(remove_err) = self.backend.remove(&container.backend_id).await {
                    tracing::error!(
                        container_id = %container.id,
                        error = %remove_err,
                        "Failed to destroy unscrubbed container"
                    );
                }
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Containers in the idle queue.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    /// Live containers (available + active).
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EphemeralBackend;

    fn test_config() -> PoolConfig {
        PoolConfig {
            min_idle: 2,
            max_capacity: 4,
            maintain_interval: Duration::from_millis(20),
            scrub_command: vec!["scrub".to_string()],
        }
    }

    #[tokio::test]
    async fn test_top_up_reaches_min_idle() {
        let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), test_config());
        pool.top_up().await.unwrap();
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.total(), 2);
    }

    #[tokio::test]
    async fn test_get_stamps_tenant_label() {
        let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), test_config());
        pool.top_up().await.unwrap();

        let container = pool.get("tenant-a", Duration::from_secs(1)).await.unwrap();
        assert_eq!(container.tenant.as_deref(), Some("tenant-a"));
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.total(), 2);
    }

    #[tokio::test]
    async fn test_put_erases_tenant_before_reoffer() {
        let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), test_config());
        pool.top_up().await.unwrap();

        let container = pool.get("tenant-a", Duration::from_secs(1)).await.unwrap();
        pool.put(container);

        // Drain the queue; every idle container must carry no tenant label.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut seen = 0;
        while let Ok(c) = pool.get("tenant-b", Duration::from_millis(20)).await {
            assert_eq!(c.tenant.as_deref(), Some("tenant-b"));
            seen += 1;
            if seen == 2 {
                break;
            }
        }
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_scrub_failure_destroys_container() {
        let backend = Arc::new(EphemeralBackend::new());
        let pool = GhostPool::new(backend.clone(), test_config());
        pool.top_up().await.unwrap();
        assert_eq!(backend.live_count(), 2);

        backend.fail_command("scrub");
        let container = pool.get("tenant-a", Duration::from_secs(1)).await.unwrap();
        pool.put(container);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.total(), 1);
        assert_eq!(backend.live_count(), 1);
    }

    #[tokio::test]
    async fn test_get_times_out_when_exhausted() {
        let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), test_config());
        // No top-up: the queue is empty.
        let err = pool.get("tenant-a", Duration::from_millis(20)).await;
        assert_eq!(err.unwrap_err(), PoolError::Exhausted);
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let config = PoolConfig {
            min_idle: 10, // wants more than capacity allows
            max_capacity: 3,
            ..test_config()
        };
        let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), config);
        pool.top_up().await.unwrap();
        pool.top_up().await.unwrap();
        assert_eq!(pool.total(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_maintainer_tops_up_in_background() {
        let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), test_config());
        pool.start_maintainer();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(pool.available() >= 2);

        // Lease one; the maintainer replaces it.
        let _container = pool.get("tenant-a", Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(pool.available() >= 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_speculative_combined_output() {
        let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), test_config());
        pool.top_up().await.unwrap();

        let container = pool.get("tenant-a", Duration::from_secs(1)).await.unwrap();
        let output = pool
            .execute_speculative(&container, &["read_database".to_string()], b"select 1")
            .await
            .unwrap();
        assert_eq!(output, "read_database: processed 8 bytes");
    }
}
