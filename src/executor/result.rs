//! Execution results
//!
//! Every processed statement produces exactly one `ExecutionResult` (success
//! or error). Row sets carry their schema and an ordered column alias map so
//! results can be rendered without consulting the catalog.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::sql::parser::StatementKind;
use crate::storage::schema::Schema;
use crate::storage::value::Row;

/// A result row set: row list, row count and column/schema descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub rows: Vec<Row>,
    pub count: usize,
    pub schema: Schema,
    /// Output column map: original name -> display alias, in output order
    pub columns: IndexMap<String, String>,
}

impl Rows {
    /// An empty row set with no schema
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            count: 0,
            schema: Schema::new(),
            columns: IndexMap::new(),
        }
    }

    /// A row set with identity aliases derived from the schema
    pub fn new(rows: Vec<Row>, schema: Schema) -> Self {
        let columns = schema
            .column_names()
            .into_iter()
            .map(|name| (name.clone(), name))
            .collect();
        let count = rows.len();
        Self {
            rows,
            count,
            schema,
            columns,
        }
    }

    /// A row set with an explicit alias map (projection output)
    pub fn with_aliases(rows: Vec<Row>, schema: Schema, columns: IndexMap<String, String>) -> Self {
        let count = rows.len();
        Self {
            rows,
            count,
            schema,
            columns,
        }
    }

    /// Display aliases in output order
    pub fn aliases(&self) -> Vec<&str> {
        self.columns.values().map(|s| s.as_str()).collect()
    }

    /// Render as an aligned text table
    pub fn render_table(&self) -> String {
        let aliases = self.aliases();
        if aliases.is_empty() {
            return String::new();
        }

        let mut widths: Vec<usize> = aliases.iter().map(|a| a.len()).collect();
        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(value.to_string().len());
                }
            }
        }

        let header = aliases
            .iter()
            .zip(&widths)
            .map(|(a, w)| format!("{:<width$}", a, width = *w))
            .collect::<Vec<_>>()
            .join(" | ");
        let separator = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-");

        let mut output = String::new();
        output.push_str(&header);
        output.push('\n');
        output.push_str(&separator);
        output.push('\n');
        for row in &self.rows {
            let line = row
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v.to_string(), width = *w))
                .collect::<Vec<_>>()
                .join(" | ");
            output.push_str(&line);
            output.push('\n');
        }
        output
    }
}

/// Whether a statement succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// The outcome of one processed statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub transaction_id: u64,
    pub timestamp_ms: i64,
    pub kind: StatementKind,
    pub status: ExecutionStatus,
    pub statement: String,
    pub message: Option<String>,
    pub previous_rows: Rows,
    pub new_rows: Rows,
}

impl ExecutionResult {
    pub fn success(
        transaction_id: u64,
        kind: StatementKind,
        statement: impl Into<String>,
        previous_rows: Rows,
        new_rows: Rows,
    ) -> Self {
        Self {
            transaction_id,
            timestamp_ms: now_millis(),
            kind,
            status: ExecutionStatus::Success,
            statement: statement.into(),
            message: None,
            previous_rows,
            new_rows,
        }
    }

    pub fn success_with_message(
        transaction_id: u64,
        kind: StatementKind,
        statement: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::success(transaction_id, kind, statement, Rows::empty(), Rows::empty());
        result.message = Some(message.into());
        result
    }

    pub fn error(
        transaction_id: u64,
        kind: StatementKind,
        statement: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id,
            timestamp_ms: now_millis(),
            kind,
            status: ExecutionStatus::Error,
            statement: statement.into(),
            message: Some(message.into()),
            previous_rows: Rows::empty(),
            new_rows: Rows::empty(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Render for a text-mode client
    pub fn render_text(&self) -> String {
        match self.status {
            ExecutionStatus::Error => {
                format!(
                    "ERROR: {}\n",
                    self.message.as_deref().unwrap_or("statement failed")
                )
            }
            ExecutionStatus::Success => {
                if let Some(msg) = &self.message {
                    return format!("{}\n", msg);
                }
                if self.kind == StatementKind::Select {
                    let mut out = self.new_rows.render_table();
                    out.push_str(&format!("{} row(s) returned\n", self.new_rows.count));
                    out
                } else {
                    format!("{} row(s) affected\n", self.new_rows.count.max(self.previous_rows.count))
                }
            }
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::Column;
    use crate::storage::value::{DataType, Value};

    #[test]
    fn test_render_table() {
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Text),
        ]);
        let rows = Rows::new(
            vec![
                vec![Value::Integer(1), Value::Text("Bob".into())],
                vec![Value::Integer(2), Value::Text("Ann".into())],
            ],
            schema,
        );
        let table = rows.render_table();
        assert!(table.starts_with("id | name"));
        assert!(table.contains("1  | Bob"));
    }

    #[test]
    fn test_error_rendering() {
        let result = ExecutionResult::error(1, StatementKind::Select, "SELECT", "boom");
        assert_eq!(result.render_text(), "ERROR: boom\n");
        assert!(!result.is_success());
    }
}
