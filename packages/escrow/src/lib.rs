//! Praetor-Escrow: Micropayment Holds & LIFO Compensation
//!
//! Funds and side effects stay in escrow while the tri-factor barrier
//! deliberates. On approval the hold is finalized and the compensation
//! stack is cleared; on rejection the stack unwinds LIFO and the hold is
//! refunded. Undo actions that keep failing after bounded retries land in
//! a dead-letter queue for operator remediation.
//!
//! # Example
//!
//! ```rust,ignore
//! use praetor_escrow::{EscrowClass, EscrowLedger};
//! use rust_decimal_macros::dec;
//!
//! let ledger = EscrowLedger::new();
//! ledger.hold_funds("tx-1", "tenant-a", "agent-7", "execute_payment",
//!     EscrowClass::Irreversible, dec!(0.001), dec!(5.0))?;
//! // barrier deliberates ...
//! ledger.release_funds("tx-1")?;
//! ```

pub mod compensation;
pub mod funds;

// Re-exports
pub use compensation::{
    CompensationConfig, CompensationEntry, CompensationResult, CompensationStack, DeadLetterEntry,
    DeadLetterMonitor, UndoFn,
};
pub use funds::{
    BillingCallback, EscrowClass, EscrowError, EscrowLedger, EscrowStatus, EscrowedFund,
};
