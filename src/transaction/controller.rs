//! Concurrency controller
//!
//! Admission control for per-statement resource accesses. Every access to a
//! table is funneled through `request`, which answers immediately with one of
//! Admit / Abort / Retry; the controller never blocks the calling thread, so
//! no transaction ever waits while holding resources and deadlock is
//! structurally impossible.
//!
//! Conflicts between transactions are broken wound-wait style by transaction
//! age: a requester older (lower id) than every conflicting holder is told to
//! retry later; a younger requester is told to abort.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};

/// Access mode requested for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

/// Outcome of an admission request. Closed set, matched exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access granted; the caller may proceed
    Admit,
    /// The requester must abort (it is younger than a conflicting holder)
    Abort,
    /// The requester should resubmit the statement later
    Retry,
}

/// How a transaction ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Commit,
    Abort,
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug)]
struct Transaction {
    state: TransactionState,
    holdings: HashSet<(String, AccessMode)>,
}

/// Per-resource lock state: at most one writer, any number of readers,
/// writer exclusive of everything else.
#[derive(Debug, Default)]
struct LockState {
    writer: Option<u64>,
    readers: HashSet<u64>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

#[derive(Debug)]
struct ControllerState {
    next_id: u64,
    transactions: HashMap<u64, Transaction>,
    locks: HashMap<String, LockState>,
}

/// The admission-control core. All state lives behind one mutex; a
/// lookup-and-grant is a single atomic step and is never observed
/// half-updated by a concurrent request on the same resource.
pub struct ConcurrencyController {
    state: Mutex<ControllerState>,
}

impl ConcurrencyController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState {
                next_id: 1,
                transactions: HashMap::new(),
                locks: HashMap::new(),
            }),
        }
    }

    /// Begin a new transaction, allocating a strictly increasing id
    pub fn begin(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.transactions.insert(
            id,
            Transaction {
                state: TransactionState::Active,
                holdings: HashSet::new(),
            },
        );
        debug!(txn = id, "transaction started");
        id
    }

    /// Request access to a resource.
    ///
    /// Abort and Retry are ordinary outcomes, not errors; the only error is
    /// `InvalidState` for an unknown or already-ended transaction id.
    pub fn request(&self, txn_id: u64, resource: &str, mode: AccessMode) -> Result<AccessDecision> {
        let mut state = self.state.lock().unwrap();
        if !state.transactions.contains_key(&txn_id) {
            return Err(Error::InvalidState(format!(
                "transaction {} is not active",
                txn_id
            )));
        }

        let lock = state.locks.entry(resource.to_string()).or_default();

        // Idempotent re-entry: an equal or stronger grant already held
        if lock.writer == Some(txn_id) {
            return Ok(AccessDecision::Admit);
        }
        if mode == AccessMode::Read && lock.readers.contains(&txn_id) {
            return Ok(AccessDecision::Admit);
        }

        let conflicts: Vec<u64> = match mode {
            AccessMode::Read => lock.writer.into_iter().collect(),
            AccessMode::Write => lock
                .writer
                .into_iter()
                .chain(lock.readers.iter().copied())
                .filter(|id| *id != txn_id)
                .collect(),
        };

        if conflicts.is_empty() {
            match mode {
                AccessMode::Read => {
                    lock.readers.insert(txn_id);
                }
                AccessMode::Write => {
                    // Upgrade: a read held by the requester gives way
                    lock.readers.remove(&txn_id);
                    lock.writer = Some(txn_id);
                }
            }
            if let Some(transaction) = state.transactions.get_mut(&txn_id) {
                transaction.holdings.insert((resource.to_string(), mode));
            }
            debug!(txn = txn_id, resource, ?mode, "access admitted");
            return Ok(AccessDecision::Admit);
        }

        // Wound-wait tie-break: the elder waits, the younger is sacrificed
        let decision = if conflicts.iter().all(|holder| txn_id < *holder) {
            AccessDecision::Retry
        } else {
            AccessDecision::Abort
        };
        debug!(
            txn = txn_id,
            resource,
            ?mode,
            ?conflicts,
            ?decision,
            "access conflict"
        );
        Ok(decision)
    }

    /// End a transaction, releasing every held access exactly once.
    ///
    /// Ending an unknown or already-ended transaction is a programming error
    /// and fails with `InvalidState`.
    pub fn end(&self, txn_id: u64, outcome: TransactionOutcome) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut transaction = state.transactions.remove(&txn_id).ok_or_else(|| {
            Error::InvalidState(format!("transaction {} already ended or unknown", txn_id))
        })?;
        transaction.state = match outcome {
            TransactionOutcome::Commit => TransactionState::Committed,
            TransactionOutcome::Abort => TransactionState::Aborted,
        };

        for (resource, mode) in &transaction.holdings {
            if let Some(lock) = state.locks.get_mut(resource) {
                match mode {
                    AccessMode::Write => {
                        if lock.writer == Some(txn_id) {
                            lock.writer = None;
                        }
                    }
                    AccessMode::Read => {
                        lock.readers.remove(&txn_id);
                    }
                }
                if lock.is_free() {
                    state.locks.remove(resource);
                }
            }
        }
        debug!(txn = txn_id, state = ?transaction.state, "transaction ended");
        Ok(())
    }

    /// True if the transaction has begun and not yet ended
    pub fn is_active(&self, txn_id: u64) -> bool {
        self.state.lock().unwrap().transactions.contains_key(&txn_id)
    }

    /// Current write holder of a resource, if any
    pub fn write_holder(&self, resource: &str) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .locks
            .get(resource)
            .and_then(|l| l.writer)
    }

    /// Current read holders of a resource, in id order
    pub fn read_holders(&self, resource: &str) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        let mut holders: Vec<u64> = state
            .locks
            .get(resource)
            .map(|l| l.readers.iter().copied().collect())
            .unwrap_or_default();
        holders.sort_unstable();
        holders
    }
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new()
    }
}
