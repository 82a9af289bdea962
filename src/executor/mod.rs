//! Statement execution
//!
//! The evaluator walks logical query trees; the processor orchestrates whole
//! statements through admission, execution, logging and transaction ends.

pub mod evaluator;
pub mod processor;
pub mod result;

pub use evaluator::evaluate;
pub use processor::{QueryProcessor, StatementOutcome};
pub use result::{ExecutionResult, ExecutionStatus, Rows};
