//! Store error type.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Nothing is visible at the path for the requesting transaction.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// An add targeted a path that already holds a value.
    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    /// The transaction was opened on a revision that is no longer current.
    #[error("Conflict on {path}: transaction {txid} is based on a stale revision")]
    Conflict { path: String, txid: String },

    /// The path is not under the collection it was sent to.
    #[error("Invalid path {path}: expected prefix {prefix}")]
    InvalidPath { path: String, prefix: String },

    /// No open branch for the transaction at the path.
    #[error("Transaction {txid} not found on {path}")]
    TransactionNotFound { path: String, txid: String },

    /// The backing key/value store rejected the request.
    #[error("Backend {operation} failed: {message}")]
    Backend { operation: String, message: String },

    /// The backing key/value store did not answer in time.
    #[error("Backend {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn not_found(path: impl Into<String>) -> Self {
        StoreError::NotFound { path: path.into() }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        StoreError::AlreadyExists { path: path.into() }
    }

    pub fn conflict(path: impl Into<String>, txid: impl Into<String>) -> Self {
        StoreError::Conflict {
            path: path.into(),
            txid: txid.into(),
        }
    }

    pub fn transaction_not_found(path: impl Into<String>, txid: impl Into<String>) -> Self {
        StoreError::TransactionNotFound {
            path: path.into(),
            txid: txid.into(),
        }
    }

    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        StoreError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        StoreError::Serialization {
            message: message.into(),
        }
    }

    /// True for failures of the backing store rather than of the request.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, StoreError::Backend { .. } | StoreError::Timeout { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
