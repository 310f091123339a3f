//! Test fixtures and store helpers.

use ledgerbridge_core::{Config, PersistentStore};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: PersistentStore,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: PersistentStore::open_in_memory().expect("Failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// Creates a new file-backed test store in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default().sync_on_commit(false))
    }

    /// Creates a file-backed test store with `config`.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = PersistentStore::open_with_config(temp_dir.path(), config)
            .expect("Failed to open file store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    /// The store directory if file-backed, `None` if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes the store and opens the same directory again, as a process
    /// restart would. In-memory stores are returned unchanged.
    pub fn reopen(self) -> Self {
        let Self { store, temp_dir } = self;
        let Some(temp_dir) = temp_dir else {
            return Self {
                store,
                temp_dir: None,
            };
        };
        drop(store);
        let store = PersistentStore::open(temp_dir.path()).expect("Failed to reopen file store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = PersistentStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use ledgerbridge_testkit::with_temp_store;
///
/// let committed = with_temp_store(|store| store.committed_seq());
/// assert_eq!(committed.as_u64(), 0);
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(PersistentStore) -> R,
{
    f(TestStore::memory().store)
}

/// Runs a test with a temporary file-backed store and its directory.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&PersistentStore, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, path)
}

/// A compound persist payload with one account and the given transaction
/// ids.
pub fn sample_payload(account_uid: &str, transaction_uids: &[&str]) -> Value {
    let transactions: Vec<Value> = transaction_uids
        .iter()
        .enumerate()
        .map(|(i, uid)| {
            json!({
                "uId": uid,
                "name": format!("Purchase {i}"),
                "location": "Downtown",
            })
        })
        .collect();
    json!({
        "account": {
            "uId": account_uid,
            "name": format!("Account {account_uid}"),
            "mask": "1234",
        },
        "transactions": transactions,
    })
}

/// The single-account, single-transaction payload used by the end-to-end
/// scenarios.
pub fn checking_payload() -> Value {
    json!({
        "account": {"uId": "A1", "name": "Checking", "mask": "1234"},
        "transactions": [{"uId": "T1", "name": "Coffee", "location": "Downtown"}]
    })
}
