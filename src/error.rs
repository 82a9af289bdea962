//! Error types for LockstepDB
//!
//! This module defines all error types used throughout the database engine.

use thiserror::Error;

/// The main error type for LockstepDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Statement Errors ==========
    #[error("Parse error: {0}")]
    ParseRejected(String),

    #[error("Validation error: {0}")]
    ValidationRejected(String),

    // ========== Admission Errors ==========
    #[error("Transaction {0} aborted: conflicting access on '{1}'")]
    AdmissionAborted(u64, String),

    // ========== Evaluator Errors ==========
    #[error("Execution error: column '{0}' not found")]
    UnknownColumn(String),

    #[error("Execution error: unsupported operation: {0}")]
    UnsupportedOperation(String),

    // ========== Storage Errors ==========
    #[error("Storage error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Storage error: table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Storage error: {0}")]
    StorageFailure(String),

    // ========== Type Errors ==========
    #[error("Type error: cannot compare {0} with {1}")]
    IncomparableValues(String, String),

    // ========== Transaction Errors ==========
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for LockstepDB operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TableNotFound("users".to_string());
        assert_eq!(err.to_string(), "Storage error: table 'users' not found");

        let err = Error::AdmissionAborted(2, "accounts".to_string());
        assert_eq!(
            err.to_string(),
            "Transaction 2 aborted: conflicting access on 'accounts'"
        );
    }
}
