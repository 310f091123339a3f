//! Storage errors.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read reached past the stored bytes.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Stored size at the time of the read.
        size: u64,
    },

    /// A truncation tried to grow the store.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    InvalidTruncate {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// The store is too large to be read into memory at once.
    #[error("storage of {size} bytes does not fit in memory")]
    TooLarge {
        /// Stored size.
        size: u64,
    },

    /// A write was refused by the backend.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

impl StorageError {
    /// Creates a write-rejected error.
    pub fn write_rejected(reason: impl Into<String>) -> Self {
        Self::WriteRejected(reason.into())
    }
}
