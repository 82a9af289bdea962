//! Value types for LockstepDB
//!
//! This module defines how data values are represented in memory and how they
//! compare under the natural ordering of their declared type.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// SQL data types supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit integer
    Integer,
    /// 64-bit floating point
    Float,
    /// Variable-length text
    Text,
}

impl DataType {
    /// Parse a type name as written in CREATE TABLE
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" | "BIGINT" => Ok(DataType::Integer),
            "FLOAT" | "DOUBLE" | "REAL" => Ok(DataType::Float),
            "TEXT" | "VARCHAR" | "CHAR" => Ok(DataType::Text),
            other => Err(Error::ParseRejected(format!("unknown type '{}'", other))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Text => write!(f, "TEXT"),
        }
    }
}

/// A value in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Integer(i64),
    /// Float value (64-bit)
    Float(f64),
    /// Text value
    Text(String),
}

// Implement PartialEq manually to give Float a total bitwise equality
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of this value, if it carries one
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Float),
            Value::Text(_) => Some(DataType::Text),
        }
    }

    /// Natural ordering used by selection predicates and ORDER BY.
    ///
    /// NULL sorts before everything; numerics compare as numbers; text
    /// compares lexicographically. Mixed text/numeric comparisons fail.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => {
                Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Integer(a), Value::Float(b)) => {
                Ok((*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Float(a), Value::Integer(b)) => {
                Ok(a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal))
            }
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (a, b) => Err(Error::IncomparableValues(
                format!("{:?}", a.data_type()),
                format!("{:?}", b.data_type()),
            )),
        }
    }

    /// Render this value as a SQL literal, suitable for a replayable statement
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                // Keep a decimal point so the literal re-parses as a float
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A single table row
pub type Row = Vec<Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_numeric() {
        assert_eq!(
            Value::Integer(1).compare(&Value::Integer(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Value::Float(1.5).compare(&Value::Integer(1)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_text() {
        assert_eq!(
            Value::Text("Ann".into()).compare(&Value::Text("Bob".into())).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_mixed_comparison_fails() {
        assert!(Value::Integer(1).compare(&Value::Text("x".into())).is_err());
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            Value::Null.compare(&Value::Integer(0)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(Value::Integer(5).to_literal(), "5");
        assert_eq!(Value::Float(2.0).to_literal(), "2.0");
        assert_eq!(Value::Text("O'Brien".into()).to_literal(), "'O''Brien'");
        assert_eq!(Value::Null.to_literal(), "NULL");
    }
}
