//! LockstepDB - a small relational database engine with a serializable
//! transaction core
//!
//! This library provides the core components:
//! - SQL parsing (tokenizer, parser, query trees, FSM validator)
//! - Storage engine (typed values, schemas, table-addressed row store)
//! - Transactional core (wound-wait concurrency controller, recovery log)
//! - Statement execution (query tree evaluator, transaction orchestrator)
//! - TCP server with length-prefixed framing

pub mod error;
pub mod executor;
pub mod server;
pub mod sql;
pub mod storage;
pub mod transaction;

pub use error::{Error, Result};
