//! Error types for contactlink.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the failure kind: invalid input never reaches the store, execution
//! errors abort the unit of work, and the retryable subset is safe to
//! re-issue because identify is idempotent.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised before the store is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Either email or phoneNumber must be provided")]
    MissingContactAttribute,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },
}

/// Execution errors that occur while reconciling against the store.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Contact store unavailable: {message}")]
    StoreUnavailable {
        message: String,
    },

    #[error("Transaction conflict: {message}")]
    TransactionConflict {
        message: String,
    },

    #[error("Invariant violation: {reason}")]
    InvariantViolation {
        reason: String,
    },

    #[error("Request queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Worker pool disconnected")]
    Disconnected,

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

impl ExecutionError {
    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for ExecutionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => Self::TransactionConflict { message },
            StorageError::InvalidLink(reason) => Self::InvariantViolation { reason },
            other => Self::StoreUnavailable {
                message: other.to_string(),
            },
        }
    }
}

/// Top-level error type for contactlink.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for LinkError {
    fn from(err: StorageError) -> Self {
        Self::Execution(err.into())
    }
}

impl LinkError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error reports corrupted link state.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::InvariantViolation { .. })
        )
    }

    /// Returns true if re-issuing the whole request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::StoreUnavailable { .. }
                    | ExecutionError::TransactionConflict { .. }
                    | ExecutionError::QueueFull { .. }
                    | ExecutionError::Timeout { .. }
            ),
        }
    }
}

/// Result type alias for contactlink operations.
pub type LinkResult<T> = Result<T, LinkError>;
