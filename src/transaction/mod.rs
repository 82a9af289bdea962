//! Transactional core
//!
//! The concurrency controller (admission control over table accesses) and the
//! recovery log (durable statement effects and compensation).

pub mod controller;
pub mod recovery;

pub use controller::{
    AccessDecision, AccessMode, ConcurrencyController, TransactionOutcome, TransactionState,
};
pub use recovery::{LogRecord, RecoveryLog};
