//! Error types for core operations.

use crate::adapter::AdapterError;
use rw_model::StoreError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Coarse status code reported to northbound callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    FailedPrecondition,
    InvalidArgument,
    AlreadyExists,
    Aborted,
    DeadlineExceeded,
    Cancelled,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by agents and managers.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// The named entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The entity is in a state that does not allow the operation.
    #[error("{id}: {message}")]
    PreconditionFailed { id: String, message: String },

    /// The adapter rejected or failed the request.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The backing store did not accept a write.
    #[error("store write failed: {source}")]
    StoreWrite { source: StoreError },

    /// The caller deadline expired.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    /// The caller cancelled the request.
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// A concurrent transaction committed first.
    #[error("concurrent update of {path}")]
    Conflict { path: String },
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn precondition(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists { kind, id: id.into() }
    }

    /// The status code a northbound caller would see.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::NotFound { .. } => ErrorCode::NotFound,
            CoreError::PreconditionFailed { .. } => ErrorCode::FailedPrecondition,
            CoreError::Adapter(e) => e.code(),
            CoreError::StoreWrite { .. } => ErrorCode::Internal,
            CoreError::Timeout { .. } => ErrorCode::DeadlineExceeded,
            CoreError::Cancelled { .. } => ErrorCode::Cancelled,
            CoreError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            CoreError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            CoreError::Conflict { .. } => ErrorCode::Aborted,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { path } => CoreError::NotFound {
                kind: "path",
                id: path,
            },
            StoreError::AlreadyExists { path } => CoreError::AlreadyExists {
                kind: "path",
                id: path,
            },
            StoreError::Conflict { path, .. } => CoreError::Conflict { path },
            other => CoreError::StoreWrite { source: other },
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
