//! Storage engine module
//!
//! Value and schema types plus the table-addressed row store.

pub mod manager;
pub mod schema;
pub mod value;

pub use manager::StorageManager;
pub use schema::{Column, Schema};
pub use value::{DataType, Row, Value};
