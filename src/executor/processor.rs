//! Transaction orchestrator
//!
//! Sequences every statement through the same path: extract the resources it
//! touches, ask the concurrency controller to admit each access, execute
//! against the evaluator or the storage mutation, record the effect in the
//! recovery log, and end the transaction when autocommit applies. On a forced
//! abort the logged effects are undone by replaying compensating statements
//! through this same path, so the replay is itself subject to admission.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::executor::evaluator::evaluate;
use crate::executor::result::{ExecutionResult, Rows};
use crate::sql::parser::{self, Statement, StatementKind};
use crate::sql::tree::plan_select;
use crate::storage::manager::StorageManager;
use crate::transaction::controller::{
    AccessDecision, AccessMode, ConcurrencyController, TransactionOutcome,
};
use crate::transaction::recovery::RecoveryLog;

/// What `process` hands back: a finished result, or a signal that the caller
/// should resubmit the same statement later.
#[derive(Debug)]
pub enum StatementOutcome {
    Completed(ExecutionResult),
    Retry,
}

#[derive(Debug, Clone, Copy)]
struct SessionTransaction {
    id: u64,
    explicit: bool,
}

/// Per-session statement processor
pub struct QueryProcessor {
    controller: Arc<ConcurrencyController>,
    recovery: Arc<RecoveryLog>,
    storage: Arc<StorageManager>,
    current: Option<SessionTransaction>,
    rolling_back: bool,
}

impl QueryProcessor {
    pub fn new(
        controller: Arc<ConcurrencyController>,
        recovery: Arc<RecoveryLog>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self {
            controller,
            recovery,
            storage,
            current: None,
            rolling_back: false,
        }
    }

    /// Open an explicit transaction
    pub fn begin(&mut self) -> Result<u64> {
        if self.current.is_some() {
            return Err(Error::InvalidState(
                "a transaction is already open on this session".to_string(),
            ));
        }
        let id = self.controller.begin();
        self.current = Some(SessionTransaction { id, explicit: true });
        Ok(id)
    }

    /// Commit the open transaction
    pub fn commit(&mut self) -> Result<u64> {
        let txn = self.current.ok_or_else(|| {
            Error::InvalidState("no transaction is open on this session".to_string())
        })?;
        // Settle the log before releasing any lock
        self.recovery.checkpoint(txn.id)?;
        self.controller.end(txn.id, TransactionOutcome::Commit)?;
        self.current = None;
        info!(txn = txn.id, "transaction committed");
        Ok(txn.id)
    }

    /// Abort the open transaction, undoing its logged effects
    pub fn rollback(&mut self) -> Result<u64> {
        let txn = self.current.ok_or_else(|| {
            Error::InvalidState("no transaction is open on this session".to_string())
        })?;
        self.replay_compensations(txn.id)?;
        self.controller.end(txn.id, TransactionOutcome::Abort)?;
        self.current = None;
        info!(txn = txn.id, "transaction rolled back");
        Ok(txn.id)
    }

    /// Id of the open transaction, if any
    pub fn current_transaction(&self) -> Option<u64> {
        self.current.map(|t| t.id)
    }

    /// Process one statement. Every call yields exactly one result or one
    /// retry signal; only core-invariant violations propagate as errors.
    pub fn process(&mut self, sql: &str) -> Result<StatementOutcome> {
        let statement = match parser::parse(sql) {
            Ok(statement) => statement,
            Err(e) => {
                debug!(%sql, error = %e, "statement rejected");
                return Ok(StatementOutcome::Completed(ExecutionResult::error(
                    self.current_transaction().unwrap_or(0),
                    guess_kind(sql),
                    sql,
                    e.to_string(),
                )));
            }
        };

        match statement {
            Statement::Begin => {
                if self.current.is_some() {
                    return Ok(StatementOutcome::Completed(ExecutionResult::error(
                        self.current_transaction().unwrap_or(0),
                        StatementKind::Begin,
                        sql,
                        "a transaction is already open",
                    )));
                }
                let id = self.begin()?;
                Ok(StatementOutcome::Completed(
                    ExecutionResult::success_with_message(
                        id,
                        StatementKind::Begin,
                        sql,
                        format!("Transaction {} started", id),
                    ),
                ))
            }
            Statement::Commit => {
                if self.current.is_none() {
                    return Ok(StatementOutcome::Completed(ExecutionResult::error(
                        0,
                        StatementKind::Commit,
                        sql,
                        "no transaction is open",
                    )));
                }
                let id = self.commit()?;
                Ok(StatementOutcome::Completed(
                    ExecutionResult::success_with_message(
                        id,
                        StatementKind::Commit,
                        sql,
                        format!("Transaction {} committed", id),
                    ),
                ))
            }
            Statement::Rollback => {
                if self.current.is_none() {
                    return Ok(StatementOutcome::Completed(ExecutionResult::error(
                        0,
                        StatementKind::Rollback,
                        sql,
                        "no transaction is open",
                    )));
                }
                let id = self.rollback()?;
                Ok(StatementOutcome::Completed(
                    ExecutionResult::success_with_message(
                        id,
                        StatementKind::Rollback,
                        sql,
                        format!("Transaction {} rolled back", id),
                    ),
                ))
            }
            other => self.process_data_statement(sql, other),
        }
    }

    fn process_data_statement(
        &mut self,
        sql: &str,
        statement: Statement,
    ) -> Result<StatementOutcome> {
        let kind = statement.kind();

        // Autocommit: wrap the statement in a fresh transaction unless one is
        // open. A transaction left pending by an earlier Retry is reused.
        let txn = match self.current {
            Some(txn) => txn,
            None => {
                let id = self.controller.begin();
                let txn = SessionTransaction {
                    id,
                    explicit: false,
                };
                self.current = Some(txn);
                txn
            }
        };

        for (resource, mode) in access_plan(&statement) {
            match self.controller.request(txn.id, &resource, mode)? {
                AccessDecision::Admit => {}
                AccessDecision::Retry => {
                    debug!(txn = txn.id, %resource, "statement deferred, retry later");
                    return Ok(StatementOutcome::Retry);
                }
                AccessDecision::Abort => {
                    let result = self.abort_for_conflict(txn.id, &resource, sql, kind)?;
                    return Ok(StatementOutcome::Completed(result));
                }
            }
        }

        match self.execute_statement(txn.id, sql, &statement) {
            Ok(result) => {
                // Durably record the effect before reporting success; only
                // statements inside an explicit transaction can need undoing.
                if txn.explicit && !self.rolling_back {
                    if let Err(e) = self.recovery.append(&result, statement_table(&statement)) {
                        warn!(txn = txn.id, error = %e, "log append failed, aborting");
                        let result = self.abort_for_failure(txn.id, sql, kind, e)?;
                        return Ok(StatementOutcome::Completed(result));
                    }
                }
                if !txn.explicit {
                    self.controller.end(txn.id, TransactionOutcome::Commit)?;
                    self.current = None;
                }
                Ok(StatementOutcome::Completed(result))
            }
            Err(e) if is_statement_error(&e) => {
                // Evaluator-level failure: the statement fails, but an
                // explicit transaction keeps its grants and stays open.
                debug!(txn = txn.id, error = %e, "statement failed");
                if !txn.explicit {
                    self.controller.end(txn.id, TransactionOutcome::Abort)?;
                    self.current = None;
                }
                Ok(StatementOutcome::Completed(ExecutionResult::error(
                    txn.id,
                    kind,
                    sql,
                    e.to_string(),
                )))
            }
            Err(Error::InvalidState(msg)) => Err(Error::InvalidState(msg)),
            Err(e) => {
                // Storage-level failure: abort. The failed statement logged
                // nothing, so only earlier effects are compensated.
                let result = self.abort_for_failure(txn.id, sql, kind, e)?;
                Ok(StatementOutcome::Completed(result))
            }
        }
    }

    fn execute_statement(
        &self,
        txn_id: u64,
        sql: &str,
        statement: &Statement,
    ) -> Result<ExecutionResult> {
        match statement {
            Statement::Select(query) => {
                let tree = plan_select(query);
                let rows = evaluate(&tree, &self.storage)?;
                Ok(ExecutionResult::success(
                    txn_id,
                    StatementKind::Select,
                    sql,
                    Rows::empty(),
                    rows,
                ))
            }
            Statement::Insert { table, rows } => {
                let schema = self.storage.table_schema(table)?;
                self.storage.insert(table, rows.clone())?;
                Ok(ExecutionResult::success(
                    txn_id,
                    StatementKind::Insert,
                    sql,
                    Rows::empty(),
                    Rows::new(rows.clone(), schema),
                ))
            }
            Statement::Update {
                table,
                assignments,
                predicate,
            } => {
                let (previous, schema) = self.storage.scan(table, predicate.as_ref())?;
                self.storage.update(table, predicate.as_ref(), assignments)?;

                let mut updated = previous.clone();
                for row in &mut updated {
                    for (column, value) in assignments {
                        if let Some(idx) = schema.column_index(column) {
                            row[idx] = value.clone();
                        }
                    }
                }
                Ok(ExecutionResult::success(
                    txn_id,
                    StatementKind::Update,
                    sql,
                    Rows::new(previous, schema.clone()),
                    Rows::new(updated, schema),
                ))
            }
            Statement::Delete { table, predicate } => {
                let (previous, schema) = self.storage.scan(table, predicate.as_ref())?;
                self.storage.delete(table, predicate.as_ref())?;
                Ok(ExecutionResult::success(
                    txn_id,
                    StatementKind::Delete,
                    sql,
                    Rows::new(previous, schema),
                    Rows::empty(),
                ))
            }
            Statement::CreateTable { table, schema } => {
                self.storage.create_table(table, schema.clone())?;
                Ok(ExecutionResult::success_with_message(
                    txn_id,
                    StatementKind::CreateTable,
                    sql,
                    format!("Table '{}' created", table),
                ))
            }
            Statement::DropTable { table } => {
                let (schema, rows) = self.storage.drop_table(table)?;
                let mut result = ExecutionResult::success(
                    txn_id,
                    StatementKind::DropTable,
                    sql,
                    Rows::new(rows, schema),
                    Rows::empty(),
                );
                result.message = Some(format!("Table '{}' dropped", table));
                Ok(result)
            }
            Statement::Begin | Statement::Commit | Statement::Rollback => Err(Error::Internal(
                "transaction statement reached the execution path".to_string(),
            )),
        }
    }

    fn abort_for_conflict(
        &mut self,
        txn_id: u64,
        resource: &str,
        sql: &str,
        kind: StatementKind,
    ) -> Result<ExecutionResult> {
        warn!(txn = txn_id, %resource, "admission denied, aborting transaction");
        self.replay_compensations(txn_id)?;
        self.controller.end(txn_id, TransactionOutcome::Abort)?;
        self.current = None;
        Ok(ExecutionResult::error(
            txn_id,
            kind,
            sql,
            Error::AdmissionAborted(txn_id, resource.to_string()).to_string(),
        ))
    }

    fn abort_for_failure(
        &mut self,
        txn_id: u64,
        sql: &str,
        kind: StatementKind,
        cause: Error,
    ) -> Result<ExecutionResult> {
        warn!(txn = txn_id, error = %cause, "statement failed, aborting transaction");
        self.replay_compensations(txn_id)?;
        self.controller.end(txn_id, TransactionOutcome::Abort)?;
        self.current = None;
        Ok(ExecutionResult::error(txn_id, kind, sql, cause.to_string()))
    }

    /// Undo the transaction's logged effects by replaying compensating
    /// statements through the ordinary statement path. The aborting
    /// transaction still holds its grants, so each replay is admitted
    /// reentrantly.
    fn replay_compensations(&mut self, txn_id: u64) -> Result<()> {
        let statements = self.recovery.compensate(txn_id);
        if statements.is_empty() {
            return Ok(());
        }
        info!(txn = txn_id, count = statements.len(), "replaying compensations");
        self.rolling_back = true;
        for statement in &statements {
            match self.process(statement) {
                Ok(StatementOutcome::Completed(result)) if result.is_success() => {}
                Ok(StatementOutcome::Completed(result)) => {
                    error!(
                        txn = txn_id,
                        %statement,
                        message = result.message.as_deref().unwrap_or(""),
                        "compensation failed"
                    );
                }
                Ok(StatementOutcome::Retry) => {
                    error!(txn = txn_id, %statement, "compensation unexpectedly deferred");
                }
                Err(e) => {
                    self.rolling_back = false;
                    return Err(e);
                }
            }
        }
        self.rolling_back = false;
        Ok(())
    }
}

/// The resource extractor: ordered (table, mode) accesses for a statement.
/// UPDATE and DELETE ask for READ before WRITE, mirroring their
/// read-then-write access pattern.
fn access_plan(statement: &Statement) -> Vec<(String, AccessMode)> {
    match statement {
        Statement::Select(query) => plan_select(query)
            .table_names()
            .into_iter()
            .map(|table| (table, AccessMode::Read))
            .collect(),
        Statement::Insert { table, .. } => vec![(table.clone(), AccessMode::Write)],
        Statement::Update { table, .. } | Statement::Delete { table, .. } => vec![
            (table.clone(), AccessMode::Read),
            (table.clone(), AccessMode::Write),
        ],
        Statement::CreateTable { table, .. } | Statement::DropTable { table } => {
            vec![(table.clone(), AccessMode::Write)]
        }
        Statement::Begin | Statement::Commit | Statement::Rollback => Vec::new(),
    }
}

fn statement_table(statement: &Statement) -> Option<&str> {
    match statement {
        Statement::Select(query) => Some(&query.table),
        Statement::Insert { table, .. }
        | Statement::Update { table, .. }
        | Statement::Delete { table, .. }
        | Statement::CreateTable { table, .. }
        | Statement::DropTable { table } => Some(table),
        Statement::Begin | Statement::Commit | Statement::Rollback => None,
    }
}

/// Errors that fail the statement without forcing the transaction down
fn is_statement_error(error: &Error) -> bool {
    matches!(
        error,
        Error::UnknownColumn(_)
            | Error::UnsupportedOperation(_)
            | Error::ParseRejected(_)
            | Error::IncomparableValues(_, _)
    )
}

fn guess_kind(sql: &str) -> StatementKind {
    match sql
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
        .as_str()
    {
        "SELECT" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "CREATE" => StatementKind::CreateTable,
        "DROP" => StatementKind::DropTable,
        "BEGIN" => StatementKind::Begin,
        "COMMIT" => StatementKind::Commit,
        "ROLLBACK" | "ABORT" => StatementKind::Rollback,
        _ => StatementKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::result::ExecutionStatus;
    use crate::storage::schema::{Column, Schema};
    use crate::storage::value::{DataType, Value};

    fn engine() -> (
        Arc<ConcurrencyController>,
        Arc<RecoveryLog>,
        Arc<StorageManager>,
    ) {
        let storage = Arc::new(StorageManager::new());
        storage
            .create_table(
                "student",
                Schema::from_columns(vec![
                    Column::new("id", DataType::Integer),
                    Column::new("name", DataType::Text),
                ]),
            )
            .unwrap();
        storage
            .insert(
                "student",
                vec![
                    vec![Value::Integer(1), Value::Text("Bob".into())],
                    vec![Value::Integer(2), Value::Text("Ann".into())],
                ],
            )
            .unwrap();
        (
            Arc::new(ConcurrencyController::new()),
            Arc::new(RecoveryLog::new()),
            storage,
        )
    }

    fn completed(outcome: StatementOutcome) -> ExecutionResult {
        match outcome {
            StatementOutcome::Completed(result) => result,
            StatementOutcome::Retry => panic!("unexpected retry"),
        }
    }

    #[test]
    fn test_autocommit_select() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc.clone(), log, storage);
        let result = completed(
            qp.process("SELECT name FROM student ORDER BY name ASC LIMIT 2;")
                .unwrap(),
        );
        assert!(result.is_success());
        assert_eq!(
            result.new_rows.rows,
            vec![
                vec![Value::Text("Ann".into())],
                vec![Value::Text("Bob".into())],
            ]
        );
        // Autocommit ended the transaction and released the read grant
        assert!(qp.current_transaction().is_none());
        assert!(cc.read_holders("student").is_empty());
    }

    #[test]
    fn test_autocommit_insert_is_visible() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc, log, storage.clone());
        let result = completed(
            qp.process("INSERT INTO student VALUES (3, 'Cy');").unwrap(),
        );
        assert!(result.is_success());
        let (rows, _) = storage.scan("student", None).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_explicit_rollback_restores_rows() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc, log, storage.clone());
        qp.process("BEGIN TRANSACTION;").unwrap();
        completed(qp.process("INSERT INTO student VALUES (9, 'Zed');").unwrap());
        let (rows, _) = storage.scan("student", None).unwrap();
        assert_eq!(rows.len(), 3);

        let result = completed(qp.process("ROLLBACK;").unwrap());
        assert!(result.is_success());
        let (rows, _) = storage.scan("student", None).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(qp.current_transaction().is_none());
    }

    #[test]
    fn test_conflict_abort_compensates_and_ends() {
        let (cc, log, storage) = engine();
        let mut older = QueryProcessor::new(cc.clone(), log.clone(), storage.clone());
        let mut younger = QueryProcessor::new(cc, log, storage.clone());

        completed(older.process("CREATE TABLE grades (id INTEGER);").unwrap());

        older.process("BEGIN;").unwrap();
        younger.process("BEGIN;").unwrap();

        // The younger transaction logs an effect, then runs into a table the
        // older transaction holds.
        completed(younger.process("INSERT INTO grades VALUES (1);").unwrap());
        completed(older.process("SELECT * FROM student;").unwrap());

        let result = completed(
            younger
                .process("UPDATE student SET name = 'X' WHERE id = 1;")
                .unwrap(),
        );
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(younger.current_transaction().is_none());

        // The younger transaction's insert was compensated away
        let (rows, _) = storage.scan("grades", None).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_older_transaction_gets_retry() {
        let (cc, log, storage) = engine();
        let mut older = QueryProcessor::new(cc.clone(), log.clone(), storage.clone());
        let mut younger = QueryProcessor::new(cc, log, storage);

        older.process("BEGIN;").unwrap();
        younger.process("BEGIN;").unwrap();
        completed(younger.process("INSERT INTO student VALUES (5, 'Eli');").unwrap());

        // The older transaction conflicts with the younger writer: retry
        let outcome = older.process("SELECT * FROM student;").unwrap();
        assert!(matches!(outcome, StatementOutcome::Retry));
        // The transaction stays open for resubmission
        assert!(older.current_transaction().is_some());

        completed(younger.process("COMMIT;").unwrap());
        let result = completed(older.process("SELECT * FROM student;").unwrap());
        assert!(result.is_success());
        assert_eq!(result.new_rows.count, 3);
    }

    #[test]
    fn test_statement_error_keeps_explicit_transaction_open() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc, log, storage);
        qp.process("BEGIN;").unwrap();
        let result = completed(qp.process("SELECT grade FROM student;").unwrap());
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(qp.current_transaction().is_some());

        let result = completed(qp.process("SELECT id FROM student;").unwrap());
        assert!(result.is_success());
        completed(qp.process("COMMIT;").unwrap());
    }

    #[test]
    fn test_missing_table_aborts_autocommit() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc.clone(), log, storage);
        let result = completed(qp.process("INSERT INTO ghosts VALUES (1);").unwrap());
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(qp.current_transaction().is_none());
        assert_eq!(cc.write_holder("ghosts"), None);
    }

    #[test]
    fn test_parse_rejection_yields_error_result() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc, log, storage);
        let result = completed(qp.process("SELET * FROM student;").unwrap());
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(qp.current_transaction().is_none());
    }

    #[test]
    fn test_begin_twice_is_statement_error() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc, log, storage);
        qp.process("BEGIN;").unwrap();
        let result = completed(qp.process("BEGIN;").unwrap());
        assert_eq!(result.status, ExecutionStatus::Error);
    }

    #[test]
    fn test_commit_without_transaction_is_statement_error() {
        let (cc, log, storage) = engine();
        let mut qp = QueryProcessor::new(cc, log, storage);
        let result = completed(qp.process("COMMIT;").unwrap());
        assert_eq!(result.status, ExecutionStatus::Error);
    }
}
