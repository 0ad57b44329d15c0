//! Compensation Stack
//!
//! LIFO rollback of side effects when governance rejects mid-flight. Each
//! transaction owns a stack of undo closures; `execute` pops them in
//! reverse push order with a bounded timeout and retry budget per entry.
//! Undo actions that exhaust their retries are appended to a read-only
//! dead-letter queue and execution continues with the remaining entries.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Boxed async undo action.
pub type UndoFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// One registered undo action.
#[derive(Clone)]
pub struct CompensationEntry {
    /// Entry id
    pub entry_id: Uuid,
    /// Owning transaction
    pub tx_id: String,
    /// What this undo reverses
    pub description: String,
    /// The undo closure
    pub undo: UndoFn,
    /// When the side effect was registered
    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for CompensationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationEntry")
            .field("entry_id", &self.entry_id)
            .field("tx_id", &self.tx_id)
            .field("description", &self.description)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// Result of executing one undo action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationResult {
    /// Entry id
    pub entry_id: Uuid,
    /// Entry description
    pub description: String,
    /// Whether the undo eventually succeeded
    pub success: bool,
    /// Total attempts made (1 + retries)
    pub attempts: u32,
    /// Last error when unsuccessful
    pub error: Option<String>,
}

/// An undo action that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Entry id
    pub entry_id: Uuid,
    /// Owning transaction
    pub tx_id: String,
    /// Entry description
    pub description: String,
    /// Last error observed
    pub last_error: String,
    /// Total attempts made
    pub attempts: u32,
    /// When retries were exhausted
    pub failed_at: DateTime<Utc>,
}

/// Execution policy per undo entry.
#[derive(Debug, Clone)]
pub struct CompensationConfig {
    /// Budget for a single undo attempt
    pub timeout: Duration,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Per-transaction LIFO stacks of undo actions.
pub struct CompensationStack {
    stacks: Mutex<HashMap<String, Vec<CompensationEntry>>>,
    dead_letters: Mutex<Vec<DeadLetterEntry>>,
    config: CompensationConfig,
}

impl Default for CompensationStack {
    fn default() -> Self {
        Self::new(CompensationConfig::default())
    }
}

impl CompensationStack {
    /// Create a stack with the given execution policy.
    pub fn new(config: CompensationConfig) -> Self {
        Self {
            stacks: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Register an undo action for a transaction.
    pub fn push(
        &self,
        tx_id: impl Into<String>,
        description: impl Into<String>,
        undo: UndoFn,
    ) -> Uuid {
        let tx_id = tx_id.into();
        let entry = CompensationEntry {
            entry_id: Uuid::new_v4(),
            tx_id: tx_id.clone(),
            description: description.into(),
            undo,
            registered_at: Utc::now(),
        };
        let entry_id = entry.entry_id;

        let mut stacks = self.stacks.lock();
        stacks.entry(tx_id.clone()).or_default().push(entry);
        tracing::debug!(tx_id = %tx_id, entry_id = %entry_id, "Compensation registered");
        entry_id
    }

    /// Number of pending undo actions for a transaction.
    pub fn pending(&self, tx_id: &str) -> usize {
        self.stacks.lock().get(tx_id).map_or(0, |s| s.len())
    }

    /// Discard a transaction's stack without executing (commit path).
    ///
    /// A second clear is a no-op returning 0.
    pub fn clear(&self, tx_id: &str) -> usize {
        let cleared = self
            .stacks
            .lock()
            .remove(tx_id)
            .map_or(0, |entries| entries.len());
        if cleared > 0 {
            tracing::debug!(tx_id = %tx_id, entries = cleared, "Compensation stack cleared");
        }
        cleared
    }

    /// Execute a transaction's undo actions in reverse push order.
    ///
    /// The stack is removed from the map before the first undo runs, so a
    /// concurrent `execute` or `clear` cannot re-run entries. Failing
    /// entries are retried per the policy and dead-lettered on exhaustion;
    /// execution always continues with the remaining entries.
    pub async fn execute(&self, tx_id: &str) -> Vec<CompensationResult> {
        let entries = match self.stacks.lock().remove(tx_id) {
            Some(entries) => entries,
            None => return Vec::new(),
        };

        tracing::info!(tx_id = %tx_id, entries = entries.len(), "Executing compensation stack");

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries.into_iter().rev() {
            results.push(self.run_entry(entry).await);
        }
        results
    }

    async fn run_entry(&self, entry: CompensationEntry) -> CompensationResult {
        let total_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            match tokio::time::timeout(self.config.timeout, (entry.undo)()).await {
                Ok(Ok(())) => {
                    tracing::info!(
                        tx_id = %entry.tx_id,
                        entry_id = %entry.entry_id,
                        attempt,
                        "Compensation succeeded"
                    );
                    return CompensationResult {
                        entry_id: entry.entry_id,
                        description: entry.description,
                        success: true,
                        attempts: attempt,
                        error: None,
                    };
                }
                Ok(Err(e)) => {
                    last_error = e;
                }
                Err(_) => {
                    last_error = format!("undo timed out after {:?}", self.config.timeout);
                }
            }

            tracing::warn!(
                tx_id = %entry.tx_id,
                entry_id = %entry.entry_id,
                attempt,
                error = %last_error,
                "Compensation attempt failed"
            );

            if attempt < total_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        let dead = DeadLetterEntry {
            entry_id: entry.entry_id,
            tx_id: entry.tx_id.clone(),
            description: entry.description.clone(),
            last_error: last_error.clone(),
            attempts: total_attempts,
            failed_at: Utc::now(),
        };
        tracing::error!(
            tx_id = %entry.tx_id,
            entry_id = %entry.entry_id,
            attempts = total_attempts,
            error = %last_error,
            "Compensation dead-lettered"
        );
        self.dead_letters.lock().push(dead);

        CompensationResult {
            entry_id: entry.entry_id,
            description: entry.description,
            success: false,
            attempts: total_attempts,
            error: Some(last_error),
        }
    }

    /// Snapshot of the dead-letter queue.
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.lock().clone()
    }
}

/// Background monitor that surfaces a non-empty dead-letter queue.
pub struct DeadLetterMonitor {
    stop: tokio::sync::watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl DeadLetterMonitor {
    /// Spawn a monitor over the given stack.
    pub fn spawn(stack: Arc<CompensationStack>, interval: Duration) -> Self {
        let (stop, mut stop_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let count = stack.dead_letters.lock().len();
                        if count > 0 {
                            tracing::warn!(count, "Dead-letter queue has unremediated entries");
                        }
                    }
                }
            }
            tracing::debug!("Dead-letter monitor stopped");
        });
        Self { stop, handle }
    }

    /// Close the stop channel and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ok_undo(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> UndoFn {
        Arc::new(move || {
            let log = log.clone();
            async move {
                log.lock().push(tag);
                Ok(())
            }
            .boxed()
        })
    }

    fn failing_undo(message: &'static str) -> UndoFn {
        Arc::new(move || async move { Err(message.to_string()) }.boxed())
    }

    fn fast_config() -> CompensationConfig {
        CompensationConfig {
            timeout: Duration::from_millis(50),
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_execute_runs_lifo() {
        let stack = CompensationStack::new(fast_config());
        let log = Arc::new(Mutex::new(Vec::new()));

        stack.push("tx-1", "undo A", ok_undo(log.clone(), "A"));
        stack.push("tx-1", "undo B", ok_undo(log.clone(), "B"));
        stack.push("tx-1", "undo C", ok_undo(log.clone(), "C"));

        let results = stack.execute("tx-1").await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(*log.lock(), vec!["C", "B", "A"]);
        assert_eq!(stack.pending("tx-1"), 0);
    }

    #[tokio::test]
    async fn test_clear_discards_without_running() {
        let stack = CompensationStack::new(fast_config());
        let log = Arc::new(Mutex::new(Vec::new()));

        stack.push("tx-1", "undo A", ok_undo(log.clone(), "A"));
        stack.push("tx-1", "undo B", ok_undo(log.clone(), "B"));

        assert_eq!(stack.clear("tx-1"), 2);
        assert!(log.lock().is_empty());
        assert_eq!(stack.pending("tx-1"), 0);

        // Second clear is a no-op.
        assert_eq!(stack.clear("tx-1"), 0);
        // Execute after clear runs nothing.
        assert!(stack.execute("tx-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_retries_then_dead_letters() {
        let stack = CompensationStack::new(fast_config());
        let log = Arc::new(Mutex::new(Vec::new()));

        stack.push("tx-1", "undo A", failing_undo("disk gone"));
        stack.push("tx-1", "undo B", ok_undo(log.clone(), "B"));

        let results = stack.execute("tx-1").await;
        // B runs first (LIFO), then A fails through its retries.
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].description, "undo B");
        assert!(!results[1].success);
        assert_eq!(results[1].attempts, 3); // max_retries + 1
        assert_eq!(results[1].error.as_deref(), Some("disk gone"));

        let dead = stack.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].description, "undo A");
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error, "disk gone");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let stack = CompensationStack::new(CompensationConfig {
            timeout: Duration::from_millis(10),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
        });

        let undo: UndoFn = Arc::new(|| {
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
            .boxed()
        });
        stack.push("tx-1", "slow undo", undo);

        let results = stack.execute("tx-1").await;
        assert!(!results[0].success);
        assert_eq!(results[0].attempts, 2);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let stack = CompensationStack::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_inner = calls.clone();
        let undo: UndoFn = Arc::new(move || {
            let calls = calls_inner.clone();
            async move {
                // Fails on the first attempt, succeeds on the second.
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("transient".to_string())
                } else {
                    Ok(())
                }
            }
            .boxed()
        });
        stack.push("tx-1", "flaky undo", undo);

        let results = stack.execute("tx-1").await;
        assert!(results[0].success);
        assert_eq!(results[0].attempts, 2);
        assert!(stack.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_execute_removes_stack_before_running() {
        let stack = Arc::new(CompensationStack::new(fast_config()));
        let log = Arc::new(Mutex::new(Vec::new()));
        stack.push("tx-1", "undo A", ok_undo(log.clone(), "A"));

        let first = stack.execute("tx-1").await;
        let second = stack.execute("tx-1").await;
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stacks_are_per_transaction() {
        let stack = CompensationStack::new(fast_config());
        let log = Arc::new(Mutex::new(Vec::new()));

        stack.push("tx-1", "undo A", ok_undo(log.clone(), "A"));
        stack.push("tx-2", "undo B", ok_undo(log.clone(), "B"));

        stack.execute("tx-1").await;
        assert_eq!(*log.lock(), vec!["A"]);
        assert_eq!(stack.pending("tx-2"), 1);
    }

    #[tokio::test]
    async fn test_monitor_start_stop() {
        let stack = Arc::new(CompensationStack::new(fast_config()));
        let monitor = DeadLetterMonitor::spawn(stack, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.shutdown().await;
    }
}
