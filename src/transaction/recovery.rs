//! Recovery log
//!
//! Append-only durable record of per-transaction statement effects. On abort
//! the orchestrator asks for the compensating statements and replays them
//! through the ordinary statement path; the log itself never executes
//! anything.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::executor::result::{ExecutionResult, Rows};
use crate::sql::parser::StatementKind;
use crate::storage::value::Row;

/// A single durable log record, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log sequence number
    pub lsn: u64,
    pub transaction_id: u64,
    pub timestamp_ms: i64,
    pub kind: StatementKind,
    pub statement: String,
    /// Affected table, for statements that have one
    pub table: Option<String>,
    /// Row snapshot prior to the statement
    pub previous_rows: Rows,
    /// Rows produced by the statement
    pub new_rows: Rows,
    /// True once the owning transaction has committed
    pub settled: bool,
}

struct LogState {
    records: Vec<LogRecord>,
    next_lsn: u64,
}

/// Append-only recovery log with an optional on-disk JSON-lines file
pub struct RecoveryLog {
    state: Mutex<LogState>,
    file: Option<Mutex<File>>,
}

impl RecoveryLog {
    /// Create an in-memory log (tests, ephemeral sessions)
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                records: Vec::new(),
                next_lsn: 1,
            }),
            file: None,
        }
    }

    /// Open a log backed by `path`, loading any records already present
    pub fn with_log_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: LogRecord = serde_json::from_str(&line)
                    .map_err(|e| Error::StorageFailure(format!("corrupt log record: {}", e)))?;
                records.push(record);
            }
        }
        // Commit markers written by checkpoint settle earlier records on reload
        let committed: Vec<u64> = records
            .iter()
            .filter(|r| r.kind == StatementKind::Commit)
            .map(|r| r.transaction_id)
            .collect();
        for record in &mut records {
            if committed.contains(&record.transaction_id) {
                record.settled = true;
            }
        }
        let next_lsn = records.iter().map(|r| r.lsn).max().unwrap_or(0) + 1;
        debug!(records = records.len(), path = %path.display(), "recovery log loaded");

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            state: Mutex::new(LogState { records, next_lsn }),
            file: Some(Mutex::new(file)),
        })
    }

    /// Append a record derived from a successful execution result.
    ///
    /// The record is flushed to disk before this returns, so a statement is
    /// never reported successful without its log entry being durable. A
    /// failed append is a statement failure.
    pub fn append(&self, result: &ExecutionResult, table: Option<&str>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let record = LogRecord {
            lsn: state.next_lsn,
            transaction_id: result.transaction_id,
            timestamp_ms: result.timestamp_ms,
            kind: result.kind,
            statement: result.statement.clone(),
            table: table.map(|t| t.to_string()),
            previous_rows: result.previous_rows.clone(),
            new_rows: result.new_rows.clone(),
            settled: false,
        };
        self.write_record(&record)?;
        state.next_lsn += 1;
        let lsn = record.lsn;
        state.records.push(record);
        Ok(lsn)
    }

    /// Statements that undo every unsettled effect logged for a transaction,
    /// in reverse chronological order. Empty if nothing needs undoing.
    pub fn compensate(&self, transaction_id: u64) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut statements = Vec::new();
        for record in state.records.iter().rev() {
            if record.transaction_id != transaction_id || record.settled {
                continue;
            }
            statements.extend(compensating_statements(record));
        }
        statements
    }

    /// Mark a transaction's records as settled (commit). Records stay in the
    /// log for audit; they are just excluded from future compensation.
    pub fn checkpoint(&self, transaction_id: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for record in &mut state.records {
            if record.transaction_id == transaction_id {
                record.settled = true;
            }
        }
        let marker = LogRecord {
            lsn: state.next_lsn,
            transaction_id,
            timestamp_ms: crate::executor::result::now_millis(),
            kind: StatementKind::Commit,
            statement: String::new(),
            table: None,
            previous_rows: Rows::empty(),
            new_rows: Rows::empty(),
            settled: true,
        };
        self.write_record(&marker)?;
        state.next_lsn += 1;
        state.records.push(marker);
        Ok(())
    }

    /// Number of records in the log
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    /// True if the log holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records logged for a transaction, oldest first
    pub fn records_for(&self, transaction_id: u64) -> Vec<LogRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    fn write_record(&self, record: &LogRecord) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let mut file = file.lock().unwrap();
        let line = serde_json::to_string(record)
            .map_err(|e| Error::StorageFailure(format!("serialize log record: {}", e)))?;
        writeln!(file, "{}", line).map_err(|e| Error::StorageFailure(e.to_string()))?;
        file.flush().map_err(|e| Error::StorageFailure(e.to_string()))?;
        Ok(())
    }
}

impl Default for RecoveryLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the statements undoing one record. A record can expand to more than
/// one statement (a dropped table is recreated, then refilled).
fn compensating_statements(record: &LogRecord) -> Vec<String> {
    let Some(table) = record.table.as_deref() else {
        return Vec::new();
    };
    match record.kind {
        StatementKind::Insert => record
            .new_rows
            .rows
            .iter()
            .filter_map(|row| delete_by_key(table, &record.new_rows, row))
            .collect(),
        StatementKind::Update => {
            // Zip pre/post snapshots: restore the old image of each row,
            // addressed by the post-update key value.
            record
                .previous_rows
                .rows
                .iter()
                .zip(record.new_rows.rows.iter())
                .filter_map(|(prev, new)| restore_row(table, &record.previous_rows, prev, new))
                .collect()
        }
        StatementKind::Delete => {
            if record.previous_rows.rows.is_empty() {
                Vec::new()
            } else {
                vec![insert_rows(table, &record.previous_rows.rows)]
            }
        }
        StatementKind::CreateTable => vec![format!("DROP TABLE {};", table)],
        StatementKind::DropTable => {
            let mut statements = vec![format!(
                "CREATE TABLE {} ({});",
                table,
                record.previous_rows.schema.to_definition()
            )];
            if !record.previous_rows.rows.is_empty() {
                statements.push(insert_rows(table, &record.previous_rows.rows));
            }
            statements
        }
        _ => Vec::new(),
    }
}

fn delete_by_key(table: &str, rows: &Rows, row: &Row) -> Option<String> {
    // The leading column acts as row identity
    let key = rows.schema.columns().first()?;
    let value = row.first()?;
    Some(format!(
        "DELETE FROM {} WHERE {} = {};",
        table,
        key.name,
        value.to_literal()
    ))
}

fn restore_row(table: &str, previous: &Rows, prev: &Row, new: &Row) -> Option<String> {
    let key = previous.schema.columns().first()?;
    let new_key = new.first()?;
    let assignments = previous
        .schema
        .columns()
        .iter()
        .zip(prev)
        .map(|(col, value)| format!("{} = {}", col.name, value.to_literal()))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "UPDATE {} SET {} WHERE {} = {};",
        table,
        assignments,
        key.name,
        new_key.to_literal()
    ))
}

fn insert_rows(table: &str, rows: &[Row]) -> String {
    let tuples = rows
        .iter()
        .map(|row| {
            format!(
                "({})",
                row.iter()
                    .map(|v| v.to_literal())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} VALUES {};", table, tuples)
}
