//! Micropayment Escrow Ledger
//!
//! Holds a micropayment for the lifetime of a gated transaction and
//! finalizes or refunds it atomically. Every fund terminates exactly once:
//! HELD is the only non-terminal status, and each transition out of it is
//! guarded by the ledger mutex and logged with the elapsed hold time.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Escrow errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    #[error("no escrowed funds for item {0}")]
    NotFound(String),
    #[error("funds for item {id} already {status}")]
    AlreadyTerminal { id: String, status: EscrowStatus },
}

/// Fund lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// In escrow awaiting a verdict
    Held,
    /// Committed to billing
    Released,
    /// Returned to the tenant
    Refunded,
    /// Aged out; counts as a refund
    Expired,
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Held => write!(f, "HELD"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Reversibility class of the governed call; irreversible holds pay double.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowClass {
    Reversible,
    Irreversible,
}

impl EscrowClass {
    fn hold_multiplier(&self) -> Decimal {
        match self {
            Self::Reversible => dec!(1),
            Self::Irreversible => dec!(2),
        }
    }
}

/// One held micropayment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowedFund {
    /// Gated transaction id
    pub item_id: String,
    /// Tenant being charged
    pub tenant_id: String,
    /// Agent that triggered the charge
    pub agent_id: String,
    /// Tool that was invoked
    pub tool_id: String,
    /// Class of the call
    pub class: EscrowClass,
    /// Held amount in credits
    pub amount: Decimal,
    /// Lifecycle status
    pub status: EscrowStatus,
    /// When the hold was placed
    pub held_at: DateTime<Utc>,
}

/// Callback invoked on terminal transitions (billing on release, credit on
/// refund/expiry).
pub type BillingCallback = Arc<dyn Fn(&EscrowedFund) + Send + Sync>;

/// The escrow ledger.
pub struct EscrowLedger {
    funds: Mutex<HashMap<String, EscrowedFund>>,
    billing_callback: Option<BillingCallback>,
    refund_callback: Option<BillingCallback>,
}

impl Default for EscrowLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl EscrowLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            funds: Mutex::new(HashMap::new()),
            billing_callback: None,
            refund_callback: None,
        }
    }

    /// Invoke the callback when funds are released to billing.
    pub fn with_billing_callback(mut self, callback: BillingCallback) -> Self {
        self.billing_callback = Some(callback);
        self
    }

    /// Invoke the callback when funds are refunded or expire.
    pub fn with_refund_callback(mut self, callback: BillingCallback) -> Self {
        self.refund_callback = Some(callback);
        self
    }

    /// Place a hold: `amount = base_cost · risk_mult · (irreversible ? 2 : 1)`.
    pub fn hold_funds(
        &self,
        item_id: impl Into<String>,
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        tool_id: impl Into<String>,
        class: EscrowClass,
        base_cost: Decimal,
        risk_multiplier: Decimal,
    ) -> Result<EscrowedFund, EscrowError> {
        let item_id = item_id.into();
        let amount = base_cost * risk_multiplier * class.hold_multiplier();

        let fund = EscrowedFund {
            item_id: item_id.clone(),
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            tool_id: tool_id.into(),
            class,
            amount,
            status: EscrowStatus::Held,
            held_at: Utc::now(),
        };

        {
            let mut funds = self.funds.lock();
            if let Some(existing) = funds.get(&item_id) {
                return Err(EscrowError::AlreadyTerminal {
                    id: item_id,
                    status: existing.status,
                });
            }
            funds.insert(item_id.clone(), fund.clone());
        }

        tracing::info!(
            item_id = %fund.item_id,
            tenant_id = %fund.tenant_id,
            amount = %fund.amount,
            class = ?fund.class,
            "Funds held in escrow"
        );

        Ok(fund)
    }

    fn transition(
        &self,
        item_id: &str,
        to: EscrowStatus,
    ) -> Result<EscrowedFund, EscrowError> {
        let fund = {
            let mut funds = self.funds.lock();
            let fund = funds
                .get_mut(item_id)
                .ok_or_else(|| EscrowError::NotFound(item_id.to_string()))?;

            if fund.status != EscrowStatus::Held {
                return Err(EscrowError::AlreadyTerminal {
                    id: item_id.to_string(),
                    status: fund.status,
                });
            }

            fund.status = to;
            fund.clone()
        };

        let held_for = Utc::now().signed_duration_since(fund.held_at);
        tracing::info!(
            item_id = %fund.item_id,
            tenant_id = %fund.tenant_id,
            amount = %fund.amount,
            status = %fund.status,
            held_ms = held_for.num_milliseconds(),
            "Escrow transition"
        );

        Ok(fund)
    }

    /// Commit a hold to billing. Idempotence: a second call reports the
    /// terminal status it already reached.
    pub fn release_funds(&self, item_id: &str) -> Result<EscrowedFund, EscrowError> {
        let fund = self.transition(item_id, EscrowStatus::Released)?;
        if let Some(cb) = &self.billing_callback {
            cb(&fund);
        }
        Ok(fund)
    }

    /// Return a hold to the tenant.
    pub fn refund_funds(&self, item_id: &str) -> Result<EscrowedFund, EscrowError> {
        let fund = self.transition(item_id, EscrowStatus::Refunded)?;
        if let Some(cb) = &self.refund_callback {
            cb(&fund);
        }
        Ok(fund)
    }

    /// Expire holds older than `max_age`. Expiry counts as a refund.
    pub fn expire_stale(&self, max_age: Duration) -> Vec<EscrowedFund> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));

        let expired: Vec<EscrowedFund> = {
            let mut funds = self.funds.lock();
            funds
                .values_mut()
                .filter(|f| f.status == EscrowStatus::Held && f.held_at < cutoff)
                .map(|f| {
                    f.status = EscrowStatus::Expired;
                    f.clone()
                })
                .collect()
        };

        for fund in &expired {
            tracing::warn!(
                item_id = %fund.item_id,
                tenant_id = %fund.tenant_id,
                amount = %fund.amount,
                "Escrowed funds expired"
            );
            if let Some(cb) = &self.refund_callback {
                cb(fund);
            }
        }

        expired
    }

    /// Look up a fund.
    pub fn get(&self, item_id: &str) -> Option<EscrowedFund> {
        self.funds.lock().get(item_id).cloned()
    }

    /// Number of funds currently HELD.
    pub fn held_count(&self) -> usize {
        self.funds
            .lock()
            .values()
            .filter(|f| f.status == EscrowStatus::Held)
            .count()
    }
}
