use crate::features::transactions::isolation::{LockType, TxId};
use crate::features::transactions::TransactionState;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, Serialize)]
pub enum Error {
    #[error("Transaction {id} not found")]
    TransactionNotFound { id: TxId },

    #[error("Transaction {id} is {state}, expected {expected}")]
    TransactionInvalidState {
        id: TxId,
        state: TransactionState,
        expected: TransactionState,
    },

    #[error("Lock timeout: tx={tx_id}, resource={resource}, mode={lock_type:?} after {waited:?}")]
    LockTimeout {
        tx_id: TxId,
        resource: String,
        lock_type: LockType,
        waited: Duration,
    },

    #[error("Deadlock detected for tx={tx_id} (cycle: {cycle:?})")]
    DeadlockDetected { tx_id: TxId, cycle: Vec<TxId> },

    #[error("Commit validation failed for tx={id}: resource {resource} changed since it was read")]
    CommitValidationFailed { id: TxId, resource: String },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Savepoint '{name}' not found in transaction {id}")]
    SavepointNotFound { id: TxId, name: String },

    #[error("Transaction {id} is read-only")]
    ReadOnlyTransaction { id: TxId },

    #[error("Maximum transaction limit reached: {limit}")]
    TransactionLimitReached { limit: usize },

    #[error("Resource not found: {resource}")]
    ResourceNotFound { resource: String },

    #[error("Resource already exists: {resource}")]
    ResourceExists { resource: String },

    #[error("Resource {resource} is at {actual}, not {expected}")]
    PathMismatch {
        resource: String,
        expected: String,
        actual: String,
    },

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse grouping used by callers that route errors to different handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    Transaction,
    Concurrency,
    Validation,
    Storage,
    Configuration,
    Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::TransactionNotFound { .. } => -23,
            Error::TransactionInvalidState { .. } => -24,
            Error::TransactionLimitReached { .. } => -25,
            Error::LockTimeout { .. } => -18,
            Error::DeadlockDetected { .. } => -65,
            Error::CommitValidationFailed { .. } => -47,
            Error::PersistenceFailure(_) => -14,
            Error::SavepointNotFound { .. } => -26,
            Error::ReadOnlyTransaction { .. } => -27,
            Error::ResourceNotFound { .. } => -6,
            Error::ResourceExists { .. } => -16,
            Error::PathMismatch { .. } => -28,
            Error::Operation(_) => -64,
            Error::Config(_) => -13,
            Error::Io(_) => -1,
            Error::Serialization(_) => -8,
            Error::Storage(_) => -15,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::TransactionNotFound { .. }
            | Error::TransactionInvalidState { .. }
            | Error::TransactionLimitReached { .. }
            | Error::SavepointNotFound { .. }
            | Error::ReadOnlyTransaction { .. } => ErrorCategory::Transaction,
            Error::LockTimeout { .. } | Error::DeadlockDetected { .. } => {
                ErrorCategory::Concurrency
            }
            Error::CommitValidationFailed { .. } => ErrorCategory::Validation,
            Error::PersistenceFailure(_)
            | Error::ResourceNotFound { .. }
            | Error::ResourceExists { .. }
            | Error::PathMismatch { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Storage(_) => ErrorCategory::Storage,
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Operation(_) => ErrorCategory::Operation,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Error::LockTimeout { .. }
            | Error::DeadlockDetected { .. }
            | Error::CommitValidationFailed { .. } => ErrorSeverity::Warning,
            Error::PersistenceFailure(_) | Error::Io(_) => ErrorSeverity::Critical,
            Error::TransactionNotFound { .. }
            | Error::SavepointNotFound { .. }
            | Error::ResourceNotFound { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Errors where running the same work again in a fresh transaction can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout { .. }
                | Error::DeadlockDetected { .. }
                | Error::CommitValidationFailed { .. }
                | Error::TransactionLimitReached { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

/// Context trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T>;
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| Error::Storage(format!("{}: {}", msg, e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Storage(format!("{}: {}", f(), e)))
    }
}
