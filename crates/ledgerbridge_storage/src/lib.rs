//! # LedgerBridge Storage
//!
//! Byte-level backends underneath the LedgerBridge commit journal.
//!
//! A backend is a dumb, append-only byte sink. It knows nothing about
//! journal records, entities or contexts; the core crate owns every byte
//! it writes and is responsible for framing and checksums.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests
//! - [`FileBackend`] - a single journal file on the local file system
//!
//! ## Example
//!
//! ```rust
//! use ledgerbridge_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"commit-1").unwrap();
//! assert_eq!(backend.read_at(offset, 8).unwrap(), b"commit-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
