//! # LedgerBridge Core
//!
//! Context-based persistence for typed, relationship-linked entities built
//! from JSON-like records.
//!
//! This crate provides:
//! - an entity codec between raw records and typed entities
//! - structured predicates built from field mappings or free text
//! - foreground and background contexts over one shared store
//! - a query engine with find-or-create, fetch, delete and batch delete
//! - relationship wiring between parents and children
//! - a CRC-checked commit journal with recovery on open
//!
//! ## Example
//!
//! ```rust
//! use ledgerbridge_core::{AccountLedger, PersistentStore};
//! use serde_json::json;
//!
//! let ledger = AccountLedger::new(PersistentStore::open_in_memory()?);
//! let outcome = ledger.persist(&json!({
//!     "account": {"uId": "A1", "name": "Checking", "mask": "1234"},
//!     "transactions": [{"uId": "T1", "name": "Coffee", "location": "Downtown"}]
//! }))?;
//! assert!(outcome.is_complete());
//! assert_eq!(ledger.fetch_transactions("A1")?.len(), 1);
//! # Ok::<(), ledgerbridge_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod config;
mod context;
mod coordinator;
#[cfg(feature = "std")]
mod dir;
mod error;
pub mod journal;
mod ledger;
mod model;
mod object;
mod predicate;
mod query;
mod relationship;
mod schema;
mod store;
mod types;

pub use codec::Record;
pub use config::Config;
pub use context::{BackgroundContext, Context};
pub use coordinator::CommitFreeze;
pub use error::{CoreError, CoreResult};
pub use ledger::{AccountLedger, PersistOutcome, TransactionFailure};
pub use model::{Account, Entity, ObjectRef, Transaction};
pub use object::{ObjectId, StoredObject};
pub use predicate::{tokenize, MatchOptions, Predicate};
pub use query::SortDescriptor;
pub use relationship::RelationshipResolver;
pub use schema::{DeleteRule, EntityDescription, RelationshipDescription, Schema};
pub use store::PersistentStore;
pub use types::{ContextId, ContextRole, SequenceNumber};
