//! Tri-Factor Escrow Gate
//!
//! A synchronization barrier that holds a speculative payload until the
//! identity, jury and entropy validators all approve. A single rejection
//! terminates the transaction; the waiter is notified exactly once either
//! way through a capacity-1 result channel whose sender is consumed on the
//! terminal transition.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{SignalSource, ValidationContext};
use crate::validators::FactorValidator;

/// Gate errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("transaction {0} is already held")]
    AlreadyHeld(String),
    #[error("transaction {0} is not held")]
    NotHeld(String),
    #[error("transaction {id} rejected by {signal_source:?} validator")]
    Rejected { id: String, signal_source: SignalSource },
    #[error("timed out waiting for release of transaction {0}")]
    Timeout(String),
    #[error("release of transaction {0} already awaited")]
    AlreadyAwaited(String),
    #[error("gate internal error: {0}")]
    Internal(String),
}

type GateResult = Result<Vec<u8>, GateError>;

/// One in-flight tri-factor transaction, exclusively owned by the gate.
pub struct HeldItem {
    /// Transaction id
    pub id: String,
    /// Tenant owning the transaction
    pub tenant_id: String,
    /// Agent that initiated the call
    pub agent_id: String,
    /// Speculative payload under escrow
    pub payload: Vec<u8>,
    /// Approvals collected so far
    pub signals: HashSet<SignalSource>,
    /// When the hold was registered
    pub created_at: DateTime<Utc>,
    /// Terminal-write end of the result channel; consumed exactly once
    tx: Option<mpsc::Sender<GateResult>>,
}

/// Outcome of processing one validator signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// More approvals still outstanding
    Pending,
    /// Full signal set collected; payload released
    Released,
    /// Rejection delivered; item terminated
    Terminated,
}

/// The tri-factor barrier.
///
/// Cheap to clone; all state is shared behind `Arc`.
#[derive(Clone)]
pub struct EscrowGate {
    /// Held items, keyed by transaction id. Never contains a terminated item.
    items: Arc<Mutex<HashMap<String, HeldItem>>>,
    /// Result-channel receivers, removed by `await_release` or eviction
    slots: Arc<Mutex<HashMap<String, mpsc::Receiver<GateResult>>>>,
    /// The three validators spawned per hold
    validators: Arc<Vec<Arc<dyn FactorValidator>>>,
}

impl EscrowGate {
    /// Create a gate with the given validator set.
    ///
    /// An empty set registers holds without spawning anything; signals are
    /// then driven through [`EscrowGate::process_signal`] directly.
    pub fn new(validators: Vec<Arc<dyn FactorValidator>>) -> Self {
        Self {
            items: Arc::new(Mutex::new(HashMap::new())),
            slots: Arc::new(Mutex::new(HashMap::new())),
            validators: Arc::new(validators),
        }
    }

    /// Register a held item and spawn the validator tasks.
    ///
    /// Fails if the transaction id is already held.
    pub fn hold(
        &self,
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), GateError> {
        let id = id.into();
        let tenant_id = tenant_id.into();
        let agent_id = agent_id.into();

        let ctx = ValidationContext {
            item_id: id.clone(),
            tenant_id: tenant_id.clone(),
            agent_id: agent_id.clone(),
            payload: payload.clone(),
        };

        {
            let mut items = self.items.lock();
            if items.contains_key(&id) {
                return Err(GateError::AlreadyHeld(id));
            }

            let (tx, rx) = mpsc::channel(1);
            items.insert(
                id.clone(),
                HeldItem {
                    id: id.clone(),
                    tenant_id,
                    agent_id,
                    payload,
                    signals: HashSet::new(),
                    created_at: Utc::now(),
                    tx: Some(tx),
                },
            );
            self.slots.lock().insert(id.clone(), rx);
        }

        tracing::debug!(item_id = %id, validators = self.validators.len(), "Item held");

        for validator in self.validators.iter() {
            let validator = validator.clone();
            let gate = self.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let source = validator.source();
                let approved = validator.validate(&ctx).await;
                match gate.process_signal(&ctx.item_id, source, approved) {
                    Ok(outcome) => {
                        tracing::debug!(
                            item_id = %ctx.item_id,
                            source = ?source,
                            approved,
                            outcome = ?outcome,
                            "Validator signal processed"
                        );
                    }
                    Err(GateError::NotHeld(_)) => {
                        // Item already terminated or evicted; late signal ignored.
                        tracing::debug!(
                            item_id = %ctx.item_id,
                            source = ?source,
                            "Late signal for terminated item ignored"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(item_id = %ctx.item_id, error = %e, "Signal processing failed");
                    }
                }
            });
        }

        Ok(())
    }

    /// Compatibility hold for callers without an agent identity.
    ///
    /// The identity validator approves an empty agent id with a warning, so
    /// this degrades to a two-sided check on signal and cognition.
    pub fn hold_compat(
        &self,
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), GateError> {
        let id = id.into();
        tracing::warn!(item_id = %id, "Compatibility hold without agent identity");
        self.hold(id, tenant_id, "", payload)
    }

    /// Aggregate one validator signal.
    ///
    /// Approvals accumulate monotonically; the item releases once the full
    /// set `{Identity, Jury, Entropy}` is present. A single rejection
    /// terminates the item. The terminal result is delivered at most once.
    pub fn process_signal(
        &self,
        id: &str,
        source: SignalSource,
        approved: bool,
    ) -> Result<SignalOutcome, GateError> {
        let (tx, result, outcome) = {
            let mut items = self.items.lock();

            if !approved {
                match items.remove(id) {
                    Some(mut item) => (
                        item.tx.take(),
                        Err(GateError::Rejected {
                            id: id.to_string(),
                            signal_source: source,
                        }),
                        SignalOutcome::Terminated,
                    ),
                    None => return Err(GateError::NotHeld(id.to_string())),
                }
            } else {
                let complete = match items.get_mut(id) {
                    Some(item) => {
                        item.signals.insert(source);
                        SignalSource::ALL.iter().all(|s| item.signals.contains(s))
                    }
                    None => return Err(GateError::NotHeld(id.to_string())),
                };

                if complete {
                    match items.remove(id) {
                        Some(mut item) => {
                            let tx = item.tx.take();
                            (tx, Ok(item.payload), SignalOutcome::Released)
                        }
                        None => return Err(GateError::NotHeld(id.to_string())),
                    }
                } else {
                    (None, Ok(Vec::new()), SignalOutcome::Pending)
                }
            }
        };

        if let Some(tx) = tx {
            // Capacity-1 channel and a just-consumed sender: the terminal
            // write cannot block or race a second delivery.
            let _ = tx.try_send(result);
            match outcome {
                SignalOutcome::Released => {
                    tracing::info!(item_id = %id, "Tri-factor convergence, item released");
                }
                SignalOutcome::Terminated => {
                    tracing::warn!(item_id = %id, source = ?source, "Item rejected");
                }
                SignalOutcome::Pending => {}
            }
        }

        Ok(outcome)
    }

    /// Block until the item's decision or the deadline.
    ///
    /// On timeout the item is evicted; in-flight validator signals for it
    /// are ignored from then on.
    pub async fn await_release(&self, id: &str, deadline: Duration) -> Result<Vec<u8>, GateError> {
        let mut rx = {
            let mut slots = self.slots.lock();
            slots
                .remove(id)
                .ok_or_else(|| GateError::AlreadyAwaited(id.to_string()))?
        };

        match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(GateError::Internal(format!(
                "result channel for {id} closed without a decision"
            ))),
            Err(_) => {
                self.evict(id);
                Err(GateError::Timeout(id.to_string()))
            }
        }
    }

    /// Remove a held item and its result slot without a decision.
    pub fn evict(&self, id: &str) -> bool {
        let removed = self.items.lock().remove(id).is_some();
        self.slots.lock().remove(id);
        if removed {
            tracing::warn!(item_id = %id, "Held item evicted");
        }
        removed
    }

    /// Whether a transaction is currently held.
    pub fn is_held(&self, id: &str) -> bool {
        self.items.lock().contains_key(id)
    }

    /// Number of in-flight held items.
    pub fn held_count(&self) -> usize {
        self.items.lock().len()
    }

    /// Approvals collected so far for a held item.
    pub fn signals(&self, id: &str) -> Option<HashSet<SignalSource>> {
        self.items.lock().get(id).map(|i| i.signals.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_gate() -> EscrowGate {
        EscrowGate::new(Vec::new())
    }

    #[tokio::test]
    async fn test_duplicate_hold_fails() {
        let gate = manual_gate();
        gate.hold("tx-1", "tenant-a", "agent-1", b"out".to_vec())
            .unwrap();
        let err = gate
            .hold("tx-1", "tenant-a", "agent-1", b"out".to_vec())
            .unwrap_err();
        assert_eq!(err, GateError::AlreadyHeld("tx-1".to_string()));
    }

    #[tokio::test]
    async fn test_release_requires_all_three() {
        let gate = manual_gate();
        gate.hold("tx-1", "tenant-a", "agent-1", b"result".to_vec())
            .unwrap();

        assert_eq!(
            gate.process_signal("tx-1", SignalSource::Identity, true)
                .unwrap(),
            SignalOutcome::Pending
        );
        assert_eq!(
            gate.process_signal("tx-1", SignalSource::Entropy, true)
                .unwrap(),
            SignalOutcome::Pending
        );
        assert!(gate.is_held("tx-1"));

        assert_eq!(
            gate.process_signal("tx-1", SignalSource::Jury, true).unwrap(),
            SignalOutcome::Released
        );
        assert!(!gate.is_held("tx-1"));

        let payload = gate
            .await_release("tx-1", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(payload, b"result".to_vec());
    }

    #[tokio::test]
    async fn test_single_reject_terminates() {
        let gate = manual_gate();
        gate.hold("tx-1", "tenant-a", "agent-1", b"result".to_vec())
            .unwrap();

        gate.process_signal("tx-1", SignalSource::Identity, true)
            .unwrap();
        assert_eq!(
            gate.process_signal("tx-1", SignalSource::Jury, false)
                .unwrap(),
            SignalOutcome::Terminated
        );
        assert!(!gate.is_held("tx-1"));

        let err = gate
            .await_release("tx-1", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GateError::Rejected {
                id: "tx-1".to_string(),
                signal_source: SignalSource::Jury,
            }
        );
    }

    #[tokio::test]
    async fn test_late_signal_ignored_after_termination() {
        let gate = manual_gate();
        gate.hold("tx-1", "tenant-a", "agent-1", Vec::new()).unwrap();
        gate.process_signal("tx-1", SignalSource::Entropy, false)
            .unwrap();

        let err = gate
            .process_signal("tx-1", SignalSource::Identity, true)
            .unwrap_err();
        assert_eq!(err, GateError::NotHeld("tx-1".to_string()));
    }

    #[tokio::test]
    async fn test_await_timeout_evicts() {
        let gate = manual_gate();
        gate.hold("tx-1", "tenant-a", "agent-1", Vec::new()).unwrap();

        let err = gate
            .await_release("tx-1", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, GateError::Timeout("tx-1".to_string()));
        assert!(!gate.is_held("tx-1"));

        // Signals arriving after eviction are ignored.
        let late = gate
            .process_signal("tx-1", SignalSource::Identity, true)
            .unwrap_err();
        assert_eq!(late, GateError::NotHeld("tx-1".to_string()));
    }

    #[tokio::test]
    async fn test_signals_arrive_in_any_order() {
        let gate = manual_gate();
        gate.hold("tx-1", "tenant-a", "agent-1", b"p".to_vec())
            .unwrap();

        gate.process_signal("tx-1", SignalSource::Jury, true).unwrap();
        gate.process_signal("tx-1", SignalSource::Identity, true)
            .unwrap();
        let outcome = gate
            .process_signal("tx-1", SignalSource::Entropy, true)
            .unwrap();
        assert_eq!(outcome, SignalOutcome::Released);
    }

    #[tokio::test]
    async fn test_duplicate_approval_is_monotonic() {
        let gate = manual_gate();
        gate.hold("tx-1", "tenant-a", "agent-1", Vec::new()).unwrap();

        gate.process_signal("tx-1", SignalSource::Identity, true)
            .unwrap();
        gate.process_signal("tx-1", SignalSource::Identity, true)
            .unwrap();
        assert_eq!(gate.signals("tx-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hold_compat_releases_without_agent() {
        use crate::jury::LocalJury;
        use crate::validators::standard_validators;

        // Full validator set: identity must warn-and-approve the empty
        // agent id for the compatibility hold to converge.
        let jury = Arc::new(LocalJury::new());
        let gate = EscrowGate::new(standard_validators(None, jury));

        gate.hold_compat("tx-compat", "tenant-a", b"plain payload".to_vec())
            .unwrap();

        let payload = gate
            .await_release("tx-compat", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(payload, b"plain payload".to_vec());
        assert!(!gate.is_held("tx-compat"));
    }

    #[tokio::test]
    async fn test_hold_compat_registers_empty_agent() {
        let gate = manual_gate();
        gate.hold_compat("tx-compat", "tenant-a", Vec::new()).unwrap();

        assert!(gate.is_held("tx-compat"));
        let items = gate.items.lock();
        assert_eq!(items.get("tx-compat").unwrap().agent_id, "");
    }

    #[tokio::test]
    async fn test_concurrent_waiter_sees_release() {
        let gate = manual_gate();
        gate.hold("tx-9", "tenant-a", "agent-1", b"late".to_vec())
            .unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_release("tx-9", Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        for source in SignalSource::ALL {
            gate.process_signal("tx-9", source, true).unwrap();
        }

        let payload = waiter.await.unwrap().unwrap();
        assert_eq!(payload, b"late".to_vec());
    }
}
