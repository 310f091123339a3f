//! Fault injection for storage backends.
//!
//! [`FaultyBackend`] behaves like an in-memory backend until a fault is
//! armed through its [`FaultHandle`]. The handle stays with the test after
//! the backend has been moved into a store.
//!
//! ```rust
//! use ledgerbridge_core::{Config, PersistentStore};
//! use ledgerbridge_testkit::FaultyBackend;
//!
//! let (backend, faults) = FaultyBackend::new();
//! let store = PersistentStore::open_with_backend(
//!     Config::default().sync_on_commit(false),
//!     Box::new(backend),
//! ).unwrap();
//!
//! faults.fail_appends(true);
//! store.foreground_context().insert::<ledgerbridge_core::Account>().unwrap();
//! assert!(!store.foreground_context().save());
//! ```

use ledgerbridge_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Faults {
    fail_appends: AtomicBool,
    fail_flushes: AtomicBool,
    /// Bytes of the next append to write before failing; `usize::MAX`
    /// disables.
    torn_append: AtomicUsize,
    failures: AtomicUsize,
}

/// In-memory backend with switchable failures.
#[derive(Debug)]
pub struct FaultyBackend {
    inner: Arc<Mutex<InMemoryBackend>>,
    faults: Arc<Faults>,
}

/// Controls the faults of a [`FaultyBackend`] and inspects its bytes.
#[derive(Debug, Clone)]
pub struct FaultHandle {
    inner: Arc<Mutex<InMemoryBackend>>,
    faults: Arc<Faults>,
}

impl FaultyBackend {
    /// Creates an empty backend and its handle.
    pub fn new() -> (Self, FaultHandle) {
        Self::with_data(Vec::new())
    }

    /// Creates a backend holding `bytes`, e.g. a journal captured from an
    /// earlier store.
    pub fn with_data(bytes: Vec<u8>) -> (Self, FaultHandle) {
        let inner = Arc::new(Mutex::new(InMemoryBackend::with_data(bytes)));
        let faults = Arc::new(Faults {
            fail_appends: AtomicBool::new(false),
            fail_flushes: AtomicBool::new(false),
            torn_append: AtomicUsize::new(usize::MAX),
            failures: AtomicUsize::new(0),
        });
        let handle = FaultHandle {
            inner: Arc::clone(&inner),
            faults: Arc::clone(&faults),
        };
        (Self { inner, faults }, handle)
    }

    fn injected(&self, what: &str) -> StorageError {
        self.faults.failures.fetch_add(1, Ordering::SeqCst);
        StorageError::write_rejected(format!("injected {what} failure"))
    }
}

impl FaultHandle {
    /// Makes every append fail until switched off.
    pub fn fail_appends(&self, on: bool) {
        self.faults.fail_appends.store(on, Ordering::SeqCst);
    }

    /// Makes every flush fail until switched off.
    pub fn fail_flushes(&self, on: bool) {
        self.faults.fail_flushes.store(on, Ordering::SeqCst);
    }

    /// Makes the next append write only `bytes` bytes and then fail.
    pub fn tear_next_append(&self, bytes: usize) {
        self.faults.torn_append.store(bytes, Ordering::SeqCst);
    }

    /// Clears every armed fault.
    pub fn heal(&self) {
        self.fail_appends(false);
        self.fail_flushes(false);
        self.faults.torn_append.store(usize::MAX, Ordering::SeqCst);
    }

    /// Number of failures injected so far.
    pub fn failures(&self) -> usize {
        self.faults.failures.load(Ordering::SeqCst)
    }

    /// Copy of the stored bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.inner.lock().data()
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.lock().read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.faults.fail_appends.load(Ordering::SeqCst) {
            return Err(self.injected("append"));
        }
        let torn = self.faults.torn_append.swap(usize::MAX, Ordering::SeqCst);
        if torn < data.len() {
            self.inner.lock().append(&data[..torn])?;
            return Err(self.injected("torn append"));
        }
        self.inner.lock().append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.faults.fail_flushes.load(Ordering::SeqCst) {
            return Err(self.injected("flush"));
        }
        self.inner.lock().flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.lock().size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.lock().truncate(new_size)
    }
}
