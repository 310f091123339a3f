//! # LedgerBridge Testkit
//!
//! Test utilities for LedgerBridge.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - A fault-injecting storage backend
//! - Property-based test generators using proptest
//! - Tracing setup for test runs
//!
//! ## Usage
//!
//! ```rust
//! use ledgerbridge_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     let ledger = AccountLedger::new(store);
//!     ledger.persist(&sample_payload("A1", &["T1"])).unwrap();
//!     assert_eq!(ledger.fetch_transactions("A1").unwrap().len(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use ledgerbridge_core::{
        Account, AccountLedger, Context, CoreError, Entity, PersistOutcome, PersistentStore,
        Predicate, Record, SortDescriptor, Transaction,
    };
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once per process.
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
