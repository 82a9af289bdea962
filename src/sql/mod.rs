//! SQL front-end
//!
//! Tokenizer, statement parser, logical query tree, and the standalone
//! finite-state statement validator.

pub mod parser;
pub mod tokenizer;
pub mod tree;
pub mod validator;

pub use parser::{parse, CompareOp, Predicate, SelectQuery, SortDirection, Statement, StatementKind};
pub use tokenizer::{tokenize, Token};
pub use tree::{plan_select, QueryNode};
pub use validator::SqlValidator;
