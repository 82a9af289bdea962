use std::sync::Arc;
use std::thread;

use lockstepdb::executor::{ExecutionStatus, QueryProcessor, StatementOutcome};
use lockstepdb::storage::StorageManager;
use lockstepdb::transaction::{
    AccessDecision, AccessMode, ConcurrencyController, RecoveryLog, TransactionOutcome,
};

fn run(processor: &mut QueryProcessor, sql: &str) -> lockstepdb::executor::ExecutionResult {
    match processor.process(sql).unwrap() {
        StatementOutcome::Completed(result) => result,
        StatementOutcome::Retry => panic!("unexpected retry for {}", sql),
    }
}

#[test]
fn test_younger_writer_aborts_against_older_reader() {
    let cc = ConcurrencyController::new();
    let older = cc.begin();
    let younger = cc.begin();

    assert_eq!(
        cc.request(older, "accounts", AccessMode::Read).unwrap(),
        AccessDecision::Admit
    );
    // Younger loses the tie-break against an older holder
    assert_eq!(
        cc.request(younger, "accounts", AccessMode::Write).unwrap(),
        AccessDecision::Abort
    );
    // The loser was not granted anything
    assert_eq!(cc.write_holder("accounts"), None);
    assert_eq!(cc.read_holders("accounts"), vec![older]);
}

#[test]
fn test_older_requester_retries_until_release() {
    let cc = ConcurrencyController::new();
    let older = cc.begin();
    let younger = cc.begin();

    assert_eq!(
        cc.request(younger, "accounts", AccessMode::Write).unwrap(),
        AccessDecision::Admit
    );
    assert_eq!(
        cc.request(older, "accounts", AccessMode::Read).unwrap(),
        AccessDecision::Retry
    );

    cc.end(younger, TransactionOutcome::Commit).unwrap();
    assert_eq!(
        cc.request(older, "accounts", AccessMode::Read).unwrap(),
        AccessDecision::Admit
    );
}

#[test]
fn test_reentrant_read_under_own_write() {
    let cc = ConcurrencyController::new();
    let txn = cc.begin();
    assert_eq!(
        cc.request(txn, "orders", AccessMode::Write).unwrap(),
        AccessDecision::Admit
    );
    assert_eq!(
        cc.request(txn, "orders", AccessMode::Read).unwrap(),
        AccessDecision::Admit
    );
    // Still a single writer, no separate read registration
    assert_eq!(cc.write_holder("orders"), Some(txn));
    assert!(cc.read_holders("orders").is_empty());
}

#[test]
fn test_write_lock_exclusivity_under_contention() {
    let cc = Arc::new(ConcurrencyController::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cc = cc.clone();
        handles.push(thread::spawn(move || {
            let mut admitted = 0u32;
            for _ in 0..50 {
                let txn = cc.begin();
                match cc.request(txn, "hot", AccessMode::Write).unwrap() {
                    AccessDecision::Admit => {
                        // While held, this transaction must be the only holder
                        assert_eq!(cc.write_holder("hot"), Some(txn));
                        assert!(cc.read_holders("hot").is_empty());
                        admitted += 1;
                        cc.end(txn, TransactionOutcome::Commit).unwrap();
                    }
                    AccessDecision::Abort | AccessDecision::Retry => {
                        cc.end(txn, TransactionOutcome::Abort).unwrap();
                    }
                }
            }
            admitted
        }));
    }

    let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // Somebody always wins; the resource ends the run free
    assert!(total > 0);
    assert_eq!(cc.write_holder("hot"), None);
    assert!(cc.read_holders("hot").is_empty());
}

#[test]
fn test_shared_reads_across_threads() {
    let cc = Arc::new(ConcurrencyController::new());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cc = cc.clone();
        handles.push(thread::spawn(move || {
            let txn = cc.begin();
            let decision = cc.request(txn, "catalog", AccessMode::Read).unwrap();
            (txn, decision)
        }));
    }

    let mut txns = Vec::new();
    for handle in handles {
        let (txn, decision) = handle.join().unwrap();
        // Readers never conflict with readers
        assert_eq!(decision, AccessDecision::Admit);
        txns.push(txn);
    }
    assert_eq!(cc.read_holders("catalog").len(), 4);
    for txn in txns {
        cc.end(txn, TransactionOutcome::Commit).unwrap();
    }
    assert!(cc.read_holders("catalog").is_empty());
}

#[test]
fn test_conflicting_sessions_end_to_end() {
    let cc = Arc::new(ConcurrencyController::new());
    let log = Arc::new(RecoveryLog::new());
    let storage = Arc::new(StorageManager::new());

    let mut setup = QueryProcessor::new(cc.clone(), log.clone(), storage.clone());
    run(&mut setup, "CREATE TABLE accounts (id INTEGER, balance INTEGER);");
    run(&mut setup, "INSERT INTO accounts VALUES (1, 100), (2, 50);");

    let mut older = QueryProcessor::new(cc.clone(), log.clone(), storage.clone());
    let mut younger = QueryProcessor::new(cc, log, storage.clone());

    run(&mut older, "BEGIN;");
    run(&mut younger, "BEGIN;");

    run(&mut older, "SELECT * FROM accounts;");

    // The younger session's write admission fails and its transaction aborts
    let result = run(
        &mut younger,
        "UPDATE accounts SET balance = 0 WHERE id = 1;",
    );
    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(younger.current_transaction().is_none());

    // The older session is untouched and the data unmodified
    let result = run(&mut older, "SELECT balance FROM accounts WHERE id = 1;");
    assert_eq!(result.new_rows.rows[0][0].to_string(), "100");
    run(&mut older, "COMMIT;");

    let (rows, _) = storage.scan("accounts", None).unwrap();
    assert_eq!(rows.len(), 2);
}
