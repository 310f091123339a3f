//! Error types for the persistence core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the persistence core.
///
/// Every operation returns one of these instead of aborting; save failures
/// are reported only after the offending context has been rolled back.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A fetch or query could not be executed, or its results could not be
    /// read back as the requested entity type.
    #[error("data fetch failed: {message}")]
    DataFetchFailed {
        /// What went wrong.
        message: String,
    },

    /// The request was malformed: missing context, unknown entity type,
    /// a bad input record, or an entity used outside its context.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A lookup that needs at least one result matched nothing.
    #[error("no data: {message}")]
    NoData {
        /// What was looked up.
        message: String,
    },

    /// A bounded save could not acquire the commit lock in time.
    #[error("timed out after {waited:?} waiting for the store")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// A commit would leave two live objects with the same identity.
    #[error("{entity} with {key} = {value:?} already exists")]
    UniqueConflict {
        /// Entity name.
        entity: String,
        /// Identity attribute.
        key: String,
        /// Conflicting identity value.
        value: String,
    },

    /// A commit would break a relationship rule.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Which rule was broken.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ledgerbridge_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The commit journal could not be encoded or read back.
    #[error("journal error: {message}")]
    Journal {
        /// Description of the problem.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,

    /// The background context's worker is gone.
    #[error("context {context} is no longer accepting work")]
    ContextClosed {
        /// Display form of the context id.
        context: String,
    },
}

impl CoreError {
    /// Creates a data-fetch-failed error.
    pub fn data_fetch_failed(message: impl Into<String>) -> Self {
        Self::DataFetchFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a no-data error.
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::NoData {
            message: message.into(),
        }
    }

    /// Creates a constraint-violation error.
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a journal error.
    pub fn journal(message: impl Into<String>) -> Self {
        Self::Journal {
            message: message.into(),
        }
    }

    /// Returns true for a [`CoreError::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
