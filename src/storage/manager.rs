//! Table storage for LockstepDB
//!
//! A table-addressed row store with an optional on-disk representation (one
//! JSON document per table under the data directory). The store gives
//! per-call consistency only; cross-statement ordering is the concurrency
//! controller's job, so there is no transaction logic here.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::sql::parser::Predicate;
use crate::storage::schema::Schema;
use crate::storage::value::{DataType, Row, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTable {
    schema: Schema,
    rows: Vec<Row>,
}

/// The storage engine: durable table storage and schema catalog
pub struct StorageManager {
    base_path: Option<PathBuf>,
    tables: RwLock<HashMap<String, StoredTable>>,
}

impl StorageManager {
    /// Create an in-memory store
    pub fn new() -> Self {
        Self {
            base_path: None,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store persisted under `base_path`, loading any existing tables
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        let mut tables = HashMap::new();
        for entry in fs::read_dir(&base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path)?;
            let table: StoredTable = serde_json::from_str(&text)
                .map_err(|e| Error::StorageFailure(format!("corrupt table file {:?}: {}", path, e)))?;
            tables.insert(name.to_string(), table);
        }
        debug!(tables = tables.len(), path = %base_path.display(), "storage loaded");

        Ok(Self {
            base_path: Some(base_path),
            tables: RwLock::new(tables),
        })
    }

    /// Create a new table
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        if tables.contains_key(name) {
            return Err(Error::TableAlreadyExists(name.to_string()));
        }
        let table = StoredTable {
            schema,
            rows: Vec::new(),
        };
        self.persist(name, &table)?;
        tables.insert(name.to_string(), table);
        Ok(())
    }

    /// Drop a table, returning its schema and rows
    pub fn drop_table(&self, name: &str) -> Result<(Schema, Vec<Row>)> {
        let mut tables = self.tables.write().unwrap();
        let table = tables
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        if let Some(base) = &self.base_path {
            let path = base.join(format!("{}.json", name));
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| Error::StorageFailure(format!("drop '{}': {}", name, e)))?;
            }
        }
        Ok((table.schema, table.rows))
    }

    /// Names of all tables
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Schema of a table
    pub fn table_schema(&self, name: &str) -> Result<Schema> {
        let tables = self.tables.read().unwrap();
        let table = tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        Ok(table.schema.clone())
    }

    /// Fetch a table's rows, optionally filtered by a predicate
    pub fn scan(&self, name: &str, predicate: Option<&Predicate>) -> Result<(Vec<Row>, Schema)> {
        let tables = self.tables.read().unwrap();
        let table = tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let rows = match predicate {
            None => table.rows.clone(),
            Some(pred) => {
                let mut matched = Vec::new();
                for row in &table.rows {
                    if pred.matches(row, &table.schema)? {
                        matched.push(row.clone());
                    }
                }
                matched
            }
        };
        Ok((rows, table.schema.clone()))
    }

    /// Insert rows into a table
    pub fn insert(&self, name: &str, rows: Vec<Row>) -> Result<usize> {
        let mut tables = self.tables.write().unwrap();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            prepared.push(coerce_row(row, &table.schema, name)?);
        }
        let count = prepared.len();
        table.rows.extend(prepared);
        let snapshot = table.clone();
        self.persist(name, &snapshot)?;
        Ok(count)
    }

    /// Update matching rows with literal assignments, returning the count
    pub fn update(
        &self,
        name: &str,
        predicate: Option<&Predicate>,
        assignments: &[(String, Value)],
    ) -> Result<usize> {
        let mut tables = self.tables.write().unwrap();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let mut indices = Vec::with_capacity(assignments.len());
        for (column, _) in assignments {
            let idx = table
                .schema
                .column_index(column)
                .ok_or_else(|| Error::UnknownColumn(column.clone()))?;
            indices.push(idx);
        }

        let mut affected = 0;
        let schema = table.schema.clone();
        for row in &mut table.rows {
            let hit = match predicate {
                None => true,
                Some(pred) => pred.matches(row, &schema)?,
            };
            if hit {
                for (slot, (_, value)) in indices.iter().zip(assignments) {
                    row[*slot] = value.clone();
                }
                affected += 1;
            }
        }
        if affected > 0 {
            let snapshot = table.clone();
            self.persist(name, &snapshot)?;
        }
        Ok(affected)
    }

    /// Delete matching rows, returning the count
    pub fn delete(&self, name: &str, predicate: Option<&Predicate>) -> Result<usize> {
        let mut tables = self.tables.write().unwrap();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let before = table.rows.len();
        match predicate {
            None => table.rows.clear(),
            Some(pred) => {
                let schema = table.schema.clone();
                let mut kept = Vec::with_capacity(table.rows.len());
                for row in table.rows.drain(..) {
                    if pred.matches(&row, &schema)? {
                        continue;
                    }
                    kept.push(row);
                }
                table.rows = kept;
            }
        }
        let affected = before - table.rows.len();
        if affected > 0 {
            let snapshot = table.clone();
            self.persist(name, &snapshot)?;
        }
        Ok(affected)
    }

    fn persist(&self, name: &str, table: &StoredTable) -> Result<()> {
        let Some(base) = &self.base_path else {
            return Ok(());
        };
        let path = base.join(format!("{}.json", name));
        let text = serde_json::to_string(table)
            .map_err(|e| Error::StorageFailure(format!("serialize '{}': {}", name, e)))?;
        fs::write(&path, text)
            .map_err(|e| Error::StorageFailure(format!("write '{}': {}", name, e)))?;
        Ok(())
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

fn coerce_row(row: Row, schema: &Schema, table: &str) -> Result<Row> {
    if row.len() != schema.len() {
        return Err(Error::StorageFailure(format!(
            "table '{}' expects {} values, got {}",
            table,
            schema.len(),
            row.len()
        )));
    }
    let mut out = Vec::with_capacity(row.len());
    for (value, column) in row.into_iter().zip(schema.columns()) {
        let coerced = match (&value, column.data_type) {
            (Value::Null, _) => value,
            (Value::Integer(i), DataType::Float) => Value::Float(*i as f64),
            (Value::Integer(_), DataType::Integer) => value,
            (Value::Float(_), DataType::Float) => value,
            (Value::Text(_), DataType::Text) => value,
            (other, expected) => {
                return Err(Error::StorageFailure(format!(
                    "column '{}' expects {}, got {:?}",
                    column.name, expected, other
                )))
            }
        };
        out.push(coerced);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::Column;

    fn seeded_store() -> StorageManager {
        let store = StorageManager::new();
        store
            .create_table(
                "student",
                Schema::from_columns(vec![
                    Column::new("id", DataType::Integer),
                    Column::new("name", DataType::Text),
                ]),
            )
            .unwrap();
        store
            .insert(
                "student",
                vec![
                    vec![Value::Integer(1), Value::Text("Bob".into())],
                    vec![Value::Integer(2), Value::Text("Ann".into())],
                    vec![Value::Integer(3), Value::Text("Cy".into())],
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_scan_with_predicate() {
        let store = seeded_store();
        let pred = Predicate::parse("id > 1").unwrap();
        let (rows, schema) = store.scan("student", Some(&pred)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(schema.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_scan_missing_table() {
        let store = StorageManager::new();
        assert!(matches!(
            store.scan("nope", None),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn test_update_and_delete_counts() {
        let store = seeded_store();
        let pred = Predicate::parse("id = 2").unwrap();
        let n = store
            .update("student", Some(&pred), &[("name".into(), Value::Text("Anne".into()))])
            .unwrap();
        assert_eq!(n, 1);

        let n = store.delete("student", Some(&pred)).unwrap();
        assert_eq!(n, 1);
        let (rows, _) = store.scan("student", None).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_insert_arity_and_type_checks() {
        let store = seeded_store();
        assert!(store
            .insert("student", vec![vec![Value::Integer(4)]])
            .is_err());
        assert!(store
            .insert(
                "student",
                vec![vec![Value::Text("x".into()), Value::Text("y".into())]]
            )
            .is_err());
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let store = seeded_store();
        assert!(matches!(
            store.create_table("student", Schema::new()),
            Err(Error::TableAlreadyExists(_))
        ));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StorageManager::with_base_path(dir.path()).unwrap();
            store
                .create_table(
                    "t",
                    Schema::from_columns(vec![Column::new("id", DataType::Integer)]),
                )
                .unwrap();
            store.insert("t", vec![vec![Value::Integer(42)]]).unwrap();
        }
        let store = StorageManager::with_base_path(dir.path()).unwrap();
        let (rows, _) = store.scan("t", None).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(42)]]);

        store.drop_table("t").unwrap();
        let store = StorageManager::with_base_path(dir.path()).unwrap();
        assert!(store.list_tables().is_empty());
    }
}
