//! Logical row evaluator
//!
//! Walks a logical query tree bottom-up and produces result rows, delegating
//! scans to the storage manager and applying selection, projection, sort and
//! limit in memory. No fixed tree shape is assumed; any nesting the planner
//! produces is evaluated child-first.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::executor::result::Rows;
use crate::sql::parser::Predicate;
use crate::sql::tree::QueryNode;
use crate::storage::manager::StorageManager;
use crate::storage::schema::{Column, Schema};

/// Evaluate a query tree against the storage manager
pub fn evaluate(node: &QueryNode, storage: &StorageManager) -> Result<Rows> {
    match node {
        QueryNode::Table { name } => {
            let (rows, schema) = storage.scan(name, None)?;
            Ok(Rows::new(rows, schema))
        }
        QueryNode::Selection { predicate, child } => {
            let predicate = Predicate::parse(predicate)?;
            // Push the predicate into the scan when it sits directly on one
            if let QueryNode::Table { name } = child.as_ref() {
                let (rows, schema) = storage.scan(name, Some(&predicate))?;
                return Ok(Rows::new(rows, schema));
            }
            let input = evaluate(child, storage)?;
            let mut kept = Vec::new();
            for row in input.rows {
                if predicate.matches(&row, &input.schema)? {
                    kept.push(row);
                }
            }
            Ok(Rows::with_aliases(kept, input.schema, input.columns))
        }
        QueryNode::Projection { columns, child } => {
            let input = evaluate(child, storage)?;
            apply_projection(columns, input)
        }
        QueryNode::Sort { order, child } => {
            let input = evaluate(child, storage)?;
            apply_sort(order, input)
        }
        QueryNode::Limit { count, child } => {
            let input = evaluate(child, storage)?;
            apply_limit(count, input)
        }
    }
}

fn apply_projection(spec: &str, input: Rows) -> Result<Rows> {
    let entries = parse_projection(spec)?;

    let mut indices = Vec::with_capacity(entries.len());
    let mut out_columns = Vec::with_capacity(entries.len());
    let mut aliases = IndexMap::new();
    for (name, alias) in &entries {
        let idx = input
            .schema
            .column_index(name)
            .ok_or_else(|| Error::UnknownColumn(name.clone()))?;
        let source = &input.schema.columns()[idx];
        let display = alias.clone().unwrap_or_else(|| name.clone());
        // Downstream operators see the alias as the column name
        out_columns.push(Column::new(display.clone(), source.data_type));
        aliases.insert(name.clone(), display);
        indices.push(idx);
    }

    let rows = input
        .rows
        .into_iter()
        .map(|row| indices.iter().map(|i| row[*i].clone()).collect())
        .collect();

    Ok(Rows::with_aliases(
        rows,
        Schema::from_columns(out_columns),
        aliases,
    ))
}

fn parse_projection(spec: &str) -> Result<Vec<(String, Option<String>)>> {
    let mut entries = Vec::new();
    for part in spec.split(',') {
        let words: Vec<&str> = part.split_whitespace().collect();
        match words.as_slice() {
            [name] => entries.push((name.to_string(), None)),
            [name, kw, alias] if kw.eq_ignore_ascii_case("AS") => {
                entries.push((name.to_string(), Some(alias.to_string())))
            }
            _ => {
                return Err(Error::ParseRejected(format!(
                    "invalid projection entry '{}'",
                    part.trim()
                )))
            }
        }
    }
    if entries.is_empty() {
        return Err(Error::ParseRejected("empty projection list".to_string()));
    }
    Ok(entries)
}

fn apply_sort(order: &str, mut input: Rows) -> Result<Rows> {
    let words: Vec<&str> = order.split_whitespace().collect();
    let (column, descending) = match words.as_slice() {
        [column] => (*column, false),
        [column, dir] if dir.eq_ignore_ascii_case("ASC") => (*column, false),
        [column, dir] if dir.eq_ignore_ascii_case("DESC") => (*column, true),
        _ => {
            return Err(Error::ParseRejected(format!(
                "invalid sort specification '{}'",
                order
            )))
        }
    };

    let idx = input
        .schema
        .column_index(column)
        .ok_or_else(|| Error::UnknownColumn(column.to_string()))?;

    // Stable sort: ties keep their input order. Values within one column
    // share a declared type, so incomparable pairs are treated as equal.
    input.rows.sort_by(|a, b| {
        let ordering = a[idx]
            .compare(&b[idx])
            .unwrap_or(std::cmp::Ordering::Equal);
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    input.count = input.rows.len();
    Ok(input)
}

fn apply_limit(count: &str, mut input: Rows) -> Result<Rows> {
    let cap: usize = count
        .trim()
        .parse()
        .map_err(|_| Error::ParseRejected(format!("invalid LIMIT '{}'", count)))?;
    input.rows.truncate(cap);
    input.count = input.rows.len();
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parser::{parse, Statement};
    use crate::sql::tree::plan_select;
    use crate::storage::value::{DataType, Value};

    fn student_store() -> StorageManager {
        let storage = StorageManager::new();
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
                    vec![Value::Integer(3), Value::Text("Cy".into())],
                ],
            )
            .unwrap();
        storage
    }

    fn run(sql: &str, storage: &StorageManager) -> Result<Rows> {
        match parse(sql).unwrap() {
            Statement::Select(q) => evaluate(&plan_select(&q), storage),
            other => panic!("expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_then_limit_then_project() {
        // table -> sort(name ASC) -> limit(2) -> projection(name)
        let storage = student_store();
        let rows = run(
            "SELECT name FROM student ORDER BY name ASC LIMIT 2;",
            &storage,
        )
        .unwrap();
        assert_eq!(
            rows.rows,
            vec![
                vec![Value::Text("Ann".into())],
                vec![Value::Text("Bob".into())],
            ]
        );
        assert_eq!(rows.count, 2);
        assert_eq!(rows.schema.column_names(), vec!["name"]);
    }

    #[test]
    fn test_selection_pushdown_matches_in_memory_filter() {
        let storage = student_store();
        let pushed = run("SELECT * FROM student WHERE id > 1;", &storage).unwrap();

        // Same predicate applied above a bare scan, no pushdown possible
        let tree = QueryNode::Selection {
            predicate: "id > 1".to_string(),
            child: Box::new(QueryNode::Limit {
                count: "10".to_string(),
                child: Box::new(QueryNode::Table {
                    name: "student".to_string(),
                }),
            }),
        };
        let filtered = evaluate(&tree, &storage).unwrap();
        assert_eq!(pushed.rows, filtered.rows);
        assert_eq!(pushed.count, 2);
    }

    #[test]
    fn test_projection_aliases() {
        let storage = student_store();
        let rows = run("SELECT name AS student_name FROM student LIMIT 1;", &storage).unwrap();
        assert_eq!(rows.schema.column_names(), vec!["student_name"]);
        assert_eq!(rows.columns.get("name"), Some(&"student_name".to_string()));
    }

    #[test]
    fn test_unknown_projection_column() {
        let storage = student_store();
        let err = run("SELECT grade FROM student;", &storage).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn(c) if c == "grade"));
    }

    #[test]
    fn test_empty_scan_is_not_an_error() {
        let storage = StorageManager::new();
        storage
            .create_table(
                "empty",
                Schema::from_columns(vec![Column::new("id", DataType::Integer)]),
            )
            .unwrap();
        let rows = run("SELECT * FROM empty ORDER BY id DESC LIMIT 5;", &storage).unwrap();
        assert_eq!(rows.count, 0);
        assert!(rows.rows.is_empty());
    }

    #[test]
    fn test_sort_desc_and_stability() {
        let storage = StorageManager::new();
        storage
            .create_table(
                "scores",
                Schema::from_columns(vec![
                    Column::new("points", DataType::Integer),
                    Column::new("who", DataType::Text),
                ]),
            )
            .unwrap();
        storage
            .insert(
                "scores",
                vec![
                    vec![Value::Integer(10), Value::Text("first".into())],
                    vec![Value::Integer(20), Value::Text("top".into())],
                    vec![Value::Integer(10), Value::Text("second".into())],
                ],
            )
            .unwrap();
        let rows = run("SELECT * FROM scores ORDER BY points DESC;", &storage).unwrap();
        assert_eq!(
            rows.rows,
            vec![
                vec![Value::Integer(20), Value::Text("top".into())],
                vec![Value::Integer(10), Value::Text("first".into())],
                vec![Value::Integer(10), Value::Text("second".into())],
            ]
        );
    }

    #[test]
    fn test_sort_above_projection_uses_alias() {
        let storage = student_store();
        let tree = QueryNode::Sort {
            order: "n DESC".to_string(),
            child: Box::new(QueryNode::Projection {
                columns: "name AS n".to_string(),
                child: Box::new(QueryNode::Table {
                    name: "student".to_string(),
                }),
            }),
        };
        let rows = evaluate(&tree, &storage).unwrap();
        assert_eq!(rows.rows[0], vec![Value::Text("Cy".into())]);
    }

    #[test]
    fn test_limit_zero() {
        let storage = student_store();
        let rows = run("SELECT * FROM student LIMIT 0;", &storage).unwrap();
        assert_eq!(rows.count, 0);
    }
}
