//! Rate Limiter
//!
//! Sliding one-minute window per `(tenant, agent)`. The hot path takes the
//! map read lock and works on per-key atomics; the write lock is only
//! needed to insert a new key. Burst tolerance is twice the sustained
//! per-minute limit, and a GC loop drops keys idle for several windows.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;

/// Rate limit errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for {tenant_id}/{agent_id}; retry after {retry_after_secs}s")]
    Exceeded {
        tenant_id: String,
        agent_id: String,
        retry_after_secs: u64,
    },
}

/// Limiter policy.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained calls per minute
    pub max_per_min: u32,
    /// GC cadence
    pub gc_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_min: 60,
            gc_interval: Duration::from_secs(300),
        }
    }
}

struct WindowCounter {
    /// Epoch minute the current window belongs to
    window_minute: AtomicU64,
    /// Calls accepted in the current window
    current: AtomicU32,
    /// Calls accepted in the previous window
    previous: AtomicU32,
    /// Epoch seconds of the last accepted call
    last_seen: AtomicU64,
}

impl WindowCounter {
    fn new(minute: u64) -> Self {
        Self {
            window_minute: AtomicU64::new(minute),
            current: AtomicU32::new(0),
            previous: AtomicU32::new(0),
            last_seen: AtomicU64::new(0),
        }
    }

    /// Roll the window forward if the minute has changed.
    fn roll(&self, now_minute: u64) {
        let seen = self.window_minute.load(Ordering::Acquire);
        if seen == now_minute {
            return;
        }

        if self
            .window_minute
            .compare_exchange(seen, now_minute, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let old_current = self.current.swap(0, Ordering::AcqRel);
            // A gap of more than one minute empties the previous window too.
            if now_minute == seen + 1 {
                self.previous.store(old_current, Ordering::Release);
            } else {
                self.previous.store(0, Ordering::Release);
            }
        }
    }
}

/// The per-(tenant, agent) sliding-window limiter.
pub struct RateLimiter {
    config: RateLimiterConfig,
    counters: RwLock<HashMap<String, Arc<WindowCounter>>>,
    gc: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl RateLimiter {
    /// Create a limiter with the given policy.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            counters: RwLock::new(HashMap::new()),
            gc: Mutex::new(None),
        }
    }

    /// Burst ceiling: twice the sustained limit.
    pub fn burst(&self) -> u32 {
        self.config.max_per_min * 2
    }

    fn counter_for(&self, key: &str, now_minute: u64) -> Arc<WindowCounter> {
        // Read-first fast path.
        if let Some(counter) = self.counters.read().get(key) {
            return counter.clone();
        }

        let mut counters = self.counters.write();
        counters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(WindowCounter::new(now_minute)))
            .clone()
    }

    /// Admit or reject one call for `(tenant, agent)`.
    pub fn check(&self, tenant_id: &str, agent_id: &str) -> Result<(), RateLimitError> {
        let now = now_secs();
        let now_minute = now / 60;
        let key = format!("{tenant_id}/{agent_id}");
        let counter = self.counter_for(&key, now_minute);

        counter.roll(now_minute);

        // Weighted sliding estimate over the previous and current windows.
        let frac = (now % 60) as f64 / 60.0;
        let previous = counter.previous.load(Ordering::Acquire) as f64;
        let current = counter.current.load(Ordering::Acquire);
        let estimate = previous * (1.0 - frac) + current as f64;

        if current >= self.burst() || estimate >= self.config.max_per_min as f64 {
            tracing::warn!(
                tenant_id = %tenant_id,
                agent_id = %agent_id,
                current,
                estimate,
                "Rate limit exceeded"
            );
            return Err(RateLimitError::Exceeded {
                tenant_id: tenant_id.to_string(),
                agent_id: agent_id.to_string(),
                retry_after_secs: 60,
            });
        }

        counter.current.fetch_add(1, Ordering::AcqRel);
        counter.last_seen.store(now, Ordering::Release);
        Ok(())
    }

    /// Drop counters idle for more than two windows; returns how many.
    pub fn gc(&self) -> usize {
        let cutoff = now_secs().saturating_sub(120);
        let mut counters = self.counters.write();
        let before = counters.len();
        counters.retain(|_, c| c.last_seen.load(Ordering::Acquire) >= cutoff);
        let removed = before - counters.len();
        if removed > 0 {
            tracing::debug!(removed, "Rate limiter counters collected");
        }
        removed
    }

    /// Number of tracked `(tenant, agent)` pairs.
    pub fn tracked(&self) -> usize {
        self.counters.read().len()
    }

    /// Spawn the GC loop. Idempotent.
    pub fn start_gc(self: &Arc<Self>) {
        let mut slot = self.gc.lock();
        if slot.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let limiter = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.config.gc_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        limiter.gc();
                    }
                }
            }
            tracing::debug!("Rate limiter GC stopped");
        });
        *slot = Some((stop_tx, handle));
    }

    /// Stop the GC loop.
    pub async fn shutdown(&self) {
        let taken = self.gc.lock().take();
        if let Some((stop, handle)) = taken {
            let _ = stop.send(true);
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_per_min: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            max_per_min,
            gc_interval: Duration::from_secs(300),
        })
    }

    #[test]
    fn test_admits_up_to_limit() {
        let limiter = limiter(10);
        let mut accepted = 0;
        for _ in 0..50 {
            if limiter.check("tenant-a", "agent-1").is_ok() {
                accepted += 1;
            }
        }
        // A cold limiter admits up to the sustained limit in one burst.
        assert_eq!(accepted, 10);
    }

    #[test]
    fn test_accepted_never_exceeds_burst() {
        let limiter = limiter(10);
        let mut accepted = 0;
        for _ in 0..100 {
            if limiter.check("tenant-a", "agent-1").is_ok() {
                accepted += 1;
            }
        }
        assert!(accepted <= limiter.burst());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(5);
        for _ in 0..5 {
            limiter.check("tenant-a", "agent-1").unwrap();
        }
        assert!(limiter.check("tenant-a", "agent-1").is_err());

        // Different agent and different tenant both start fresh.
        assert!(limiter.check("tenant-a", "agent-2").is_ok());
        assert!(limiter.check("tenant-b", "agent-1").is_ok());
    }

    #[test]
    fn test_error_carries_retry_after() {
        let limiter = limiter(1);
        limiter.check("tenant-a", "agent-1").unwrap();
        let err = limiter.check("tenant-a", "agent-1").unwrap_err();
        match err {
            RateLimitError::Exceeded {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 60),
        }
    }

    #[test]
    fn test_gc_keeps_recent_keys() {
        let limiter = limiter(10);
        limiter.check("tenant-a", "agent-1").unwrap();
        assert_eq!(limiter.tracked(), 1);
        // Just-used counter survives.
        assert_eq!(limiter.gc(), 0);
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test]
    async fn test_gc_loop_start_stop() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            max_per_min: 10,
            gc_interval: Duration::from_millis(10),
        }));
        limiter.start_gc();
        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.shutdown().await;
    }
}
