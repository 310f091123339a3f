//! The persistent store facade.

use crate::config::Config;
use crate::context::{BackgroundContext, Context};
use crate::coordinator::{CommitFreeze, StoreCoordinator};
use crate::error::CoreResult;
use crate::schema::Schema;
use crate::types::{ContextRole, SequenceNumber};
use ledgerbridge_storage::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(feature = "std")]
use crate::dir::StoreDir;
#[cfg(feature = "std")]
use std::path::Path;

/// An embedded store with one foreground context and any number of
/// background contexts.
///
/// Open it explicitly at startup and [`close`](Self::close) it at shutdown;
/// dropping the store closes it too.
///
/// # Example
///
/// ```rust
/// use ledgerbridge_core::{Account, PersistentStore, Predicate};
///
/// let store = PersistentStore::open_in_memory()?;
/// let uid = store.perform_background_task(|ctx| {
///     let account: Account = ctx
///         .insert_or_fetch(Some(&Predicate::eq("uId", "A1")))?
///         .remove(0);
///     ctx.try_save()?;
///     Ok::<_, ledgerbridge_core::CoreError>(account.uid)
/// })??;
///
/// let found: Account = store
///     .foreground_context()
///     .fetch_one(Some(&Predicate::eq("uId", "A1")))?;
/// assert_eq!(found.uid, uid);
/// # Ok::<(), ledgerbridge_core::CoreError>(())
/// ```
pub struct PersistentStore {
    coordinator: Arc<StoreCoordinator>,
    foreground: Context,
    save_timeout: Option<std::time::Duration>,
    #[cfg(feature = "std")]
    dir: Option<StoreDir>,
}

impl PersistentStore {
    /// Opens or creates a store directory with default configuration.
    ///
    /// # Errors
    ///
    /// See [`Self::open_with_config`].
    #[cfg(feature = "std")]
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a store directory.
    ///
    /// Takes the directory lock and replays the journal.
    ///
    /// # Errors
    ///
    /// Returns `StoreLocked` when another process has the store open,
    /// `InvalidRequest` for a bad path or schema, `Journal` for a corrupt
    /// journal, or the I/O failure.
    #[cfg(feature = "std")]
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        use ledgerbridge_storage::FileBackend;

        let dir = StoreDir::open(path.as_ref(), config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let mut store = Self::open_with_backend(config, Box::new(backend))?;
        info!(path = %dir.path().display(), "store opened");
        store.dir = Some(dir);
        Ok(store)
    }

    /// Opens an ephemeral store.
    ///
    /// # Errors
    ///
    /// Returns an error only for an invalid default schema.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(
            Config::default().sync_on_commit(false),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Opens a store whose journal lives on `backend`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an invalid schema, `Journal` for a
    /// corrupt journal, or the backend failure.
    pub fn open_with_backend(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let coordinator = Arc::new(StoreCoordinator::open(
            config.schema,
            backend,
            config.sync_on_commit,
        )?);
        let foreground = Context::new(
            Arc::clone(&coordinator),
            ContextRole::Foreground,
            config.save_timeout,
        );
        Ok(Self {
            coordinator,
            foreground,
            save_timeout: config.save_timeout,
            #[cfg(feature = "std")]
            dir: None,
        })
    }

    /// The long-lived context for the presentation path.
    #[must_use]
    pub fn foreground_context(&self) -> &Context {
        &self.foreground
    }

    /// A fresh background context with its own worker thread.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` after [`Self::close`], or the thread spawn
    /// failure.
    pub fn new_background_context(&self) -> CoreResult<BackgroundContext> {
        self.coordinator.ensure_open()?;
        BackgroundContext::spawn(Context::new(
            Arc::clone(&self.coordinator),
            ContextRole::Background,
            self.save_timeout,
        ))
    }

    /// Runs `task` on a fresh background context and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns the context creation failure or `ContextClosed` if the task
    /// panicked.
    pub fn perform_background_task<F, R>(&self, task: F) -> CoreResult<R>
    where
        F: FnOnce(&Context) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.new_background_context()?.perform_and_wait(task)
    }

    /// Commits `context`; on failure it is rolled back and `false` returned.
    pub fn save(&self, context: &Context) -> bool {
        context.save()
    }

    /// Blocks all commits until the returned guard is dropped.
    pub fn freeze_commits(&self) -> CommitFreeze<'_> {
        self.coordinator.freeze()
    }

    /// The schema the store was opened with.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.coordinator.schema()
    }

    /// Sequence number of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.coordinator.committed_seq()
    }

    /// Number of committed objects.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` after close.
    pub fn object_count(&self) -> CoreResult<usize> {
        self.coordinator.read(|table| table.len())
    }

    /// Store directory, for file-backed stores.
    #[cfg(feature = "std")]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Syncs the journal and refuses further work. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the sync failure; the store is closed regardless.
    pub fn close(&self) -> CoreResult<()> {
        self.coordinator.close()
    }

    /// Whether [`Self::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.coordinator.is_closed()
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close store cleanly");
        }
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("coordinator", &self.coordinator)
            .field("foreground", &self.foreground)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::Account;
    use crate::predicate::Predicate;
    use tempfile::tempdir;

    fn insert_account(ctx: &Context, uid: &str) {
        ctx.insert_or_fetch::<Account>(Some(&Predicate::eq("uId", uid)))
            .unwrap();
    }

    #[test]
    fn background_save_is_visible_in_foreground() {
        let store = PersistentStore::open_in_memory().unwrap();
        let saved = store
            .perform_background_task(|ctx| {
                insert_account(ctx, "A1");
                ctx.save()
            })
            .unwrap();
        assert!(saved);
        assert_eq!(store.foreground_context().count::<Account>(None).unwrap(), 1);
        assert_eq!(store.committed_seq(), SequenceNumber::new(1));
    }

    #[test]
    fn reopen_recovers_committed_state() {
        let tmp = tempdir().unwrap();
        {
            let store = PersistentStore::open(tmp.path()).unwrap();
            insert_account(store.foreground_context(), "A1");
            assert!(store.save(store.foreground_context()));
            insert_account(store.foreground_context(), "A2");
            // A2 never saved
        }
        let store = PersistentStore::open(tmp.path()).unwrap();
        assert_eq!(store.object_count().unwrap(), 1);
        assert_eq!(store.path(), Some(tmp.path()));
    }

    #[test]
    fn closed_store_refuses_work() {
        let store = PersistentStore::open_in_memory().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(
            store.new_background_context(),
            Err(CoreError::StoreClosed)
        ));
        assert!(matches!(
            store.foreground_context().fetch::<Account>(None, &[]),
            Err(CoreError::StoreClosed)
        ));
    }

    #[test]
    fn default_save_timeout_applies() {
        let store = PersistentStore::open_with_backend(
            Config::default().save_timeout(std::time::Duration::from_millis(10)),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();
        insert_account(store.foreground_context(), "A1");
        let freeze = store.freeze_commits();
        assert!(store.foreground_context().try_save().unwrap_err().is_timeout());
        drop(freeze);
        assert_eq!(store.object_count().unwrap(), 0);
        assert!(store.foreground_context().save());
    }
}
