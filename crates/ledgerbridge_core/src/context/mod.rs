//! Contexts: isolated units of work over the shared store.
//!
//! A [`Context`] layers its own pending changes over the committed table.
//! Reads through a context see committed state plus that context's unsaved
//! inserts, updates and deletes; other contexts see none of it until
//! [`Context::save`] commits.
//!
//! Entities remember the context that produced them. Passing an entity to a
//! different context is rejected; exchange ids instead and re-fetch with
//! [`Context::object`].

mod queue;
pub(crate) mod state;

pub use queue::BackgroundContext;

use crate::coordinator::StoreCoordinator;
use crate::error::{CoreError, CoreResult};
use crate::model::Entity;
use crate::object::{ObjectId, StoredObject};
use crate::schema::{DeleteRule, EntityDescription};
use crate::types::{ContextId, ContextRole, SequenceNumber};
use parking_lot::Mutex;
use state::{PendingChange, PendingChanges};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A unit-of-work handle.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    role: ContextRole,
    coordinator: Arc<StoreCoordinator>,
    save_timeout: Option<Duration>,
    pending: Mutex<PendingChanges>,
}

impl Context {
    pub(crate) fn new(
        coordinator: Arc<StoreCoordinator>,
        role: ContextRole,
        save_timeout: Option<Duration>,
    ) -> Self {
        let id = coordinator.allocate_context();
        debug!(context = %id, ?role, "context created");
        Self {
            inner: Arc::new(ContextInner {
                id,
                role,
                coordinator,
                save_timeout,
                pending: Mutex::new(PendingChanges::new()),
            }),
        }
    }

    /// This context's id.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Foreground or background.
    #[must_use]
    pub fn role(&self) -> ContextRole {
        self.inner.role
    }

    /// Whether there are unsaved changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.inner.pending.lock().is_empty()
    }

    /// Number of objects with unsaved changes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Commits pending changes.
    ///
    /// Returns `false` on failure. A failed commit discards the pending
    /// changes, except on timeout, which leaves them in place for a retry.
    /// Never panics past this boundary.
    pub fn save(&self) -> bool {
        self.try_save().is_ok()
    }

    /// Commits pending changes, bounded by the store's default save
    /// timeout when one is configured.
    ///
    /// # Errors
    ///
    /// Returns the commit failure after rolling back, or `Timeout` with the
    /// context unchanged.
    pub fn try_save(&self) -> CoreResult<SequenceNumber> {
        self.save_bounded(self.inner.save_timeout)
    }

    /// Commits pending changes, waiting at most `timeout` for the commit
    /// lock.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_save`].
    pub fn save_with_timeout(&self, timeout: Duration) -> CoreResult<SequenceNumber> {
        self.save_bounded(Some(timeout))
    }

    fn save_bounded(&self, timeout: Option<Duration>) -> CoreResult<SequenceNumber> {
        let mut pending = self.inner.pending.lock();
        if pending.is_empty() {
            return Ok(self.inner.coordinator.committed_seq());
        }

        let changes = pending.len();
        match self.inner.coordinator.commit(pending.snapshot(), timeout) {
            Ok(sequence) => {
                pending.clear();
                debug!(context = %self.id(), %sequence, changes, "save committed");
                Ok(sequence)
            }
            Err(err) if err.is_timeout() => {
                warn!(context = %self.id(), error = %err, "save timed out; changes kept");
                Err(err)
            }
            Err(err) => {
                pending.clear();
                warn!(context = %self.id(), error = %err, changes, "save failed; rolled back");
                Err(err)
            }
        }
    }

    /// Discards every unsaved change.
    pub fn rollback(&self) {
        let mut pending = self.inner.pending.lock();
        if !pending.is_empty() {
            debug!(context = %self.id(), changes = pending.len(), "rollback");
            pending.clear();
        }
    }

    pub(crate) fn coordinator(&self) -> &StoreCoordinator {
        &self.inner.coordinator
    }

    pub(crate) fn save_timeout(&self) -> Option<Duration> {
        self.inner.save_timeout
    }

    /// Description of `entity` from the store's schema.
    pub(crate) fn describe(&self, entity: &str) -> Option<&EntityDescription> {
        self.inner.coordinator.schema().describe(entity)
    }

    /// Rejects entities produced by another context.
    pub(crate) fn check_binding<T: Entity>(&self, entity: &T) -> CoreResult<()> {
        let owner = entity.binding().context();
        if owner == self.id() {
            Ok(())
        } else {
            Err(CoreError::invalid_request(format!(
                "{} {} belongs to {owner}, not {}",
                T::ENTITY_NAME,
                entity.id(),
                self.id()
            )))
        }
    }

    /// Objects of `entity` as this context sees them, in creation order.
    pub(crate) fn objects_of(&self, entity: &str) -> CoreResult<Vec<StoredObject>> {
        let pending = self.inner.pending.lock();
        let mut objects = self.inner.coordinator.read(|table| {
            table
                .of_entity(entity)
                .filter(|object| pending.get(&object.id).is_none())
                .cloned()
                .collect::<Vec<_>>()
        })?;
        objects.extend(pending.upserts_of(entity).cloned());
        objects.sort_by_key(|object| object.ordinal);
        Ok(objects)
    }

    /// One object as this context sees it.
    pub(crate) fn lookup(&self, id: ObjectId) -> CoreResult<Option<StoredObject>> {
        let pending = self.inner.pending.lock();
        match pending.get(&id) {
            Some(PendingChange::Upsert(object)) => Ok(Some(object.clone())),
            Some(PendingChange::Delete) => Ok(None),
            None => self.inner.coordinator.read(|table| table.get(&id).cloned()),
        }
    }

    /// A fresh object of `entity` with a new id and creation ordinal.
    pub(crate) fn new_object(&self, entity: &str) -> StoredObject {
        StoredObject::new(
            ObjectId::new(),
            entity,
            self.inner.coordinator.allocate_ordinal(),
        )
    }

    pub(crate) fn stage(&self, object: StoredObject) -> CoreResult<()> {
        self.inner.coordinator.ensure_open()?;
        self.inner.pending.lock().upsert(object);
        Ok(())
    }

    pub(crate) fn stage_delete(&self, id: ObjectId) -> CoreResult<()> {
        let committed = self.inner.coordinator.read(|table| table.contains(&id))?;
        self.inner.pending.lock().delete(id, committed);
        Ok(())
    }

    /// Forgets the pending change to `id`: a committed object reads as
    /// committed again, an unsaved one disappears.
    pub(crate) fn revert(&self, id: ObjectId) {
        self.inner.pending.lock().discard(&id);
    }

    /// Reconciles pending changes with objects the store already removed.
    ///
    /// Changes to removed objects are dropped. Staged objects pointing at a
    /// removed object follow the relationship's delete rule: nullified
    /// references are cleared, anything else is dropped along with its own
    /// staged children.
    pub(crate) fn forget_removed(&self, removed: &HashSet<ObjectId>) {
        let mut pending = self.inner.pending.lock();
        let mut gone = removed.clone();
        for id in &gone {
            pending.discard(id);
        }
        loop {
            let children = pending.referencing(&gone);
            if children.is_empty() {
                break;
            }
            for mut child in children {
                let description = self.describe(&child.entity);
                let dangling: Vec<String> = child
                    .relations
                    .iter()
                    .filter(|(_, target)| gone.contains(*target))
                    .map(|(name, _)| name.clone())
                    .collect();
                let nullify = dangling.iter().all(|name| {
                    description
                        .and_then(|d| d.relationship_named(name))
                        .is_some_and(|r| r.delete_rule == DeleteRule::Nullify)
                });
                if nullify {
                    for name in &dangling {
                        child.set_relation(name, None);
                    }
                    pending.upsert(child);
                } else {
                    debug!(context = %self.inner.id, object = %child.id, "dropping staged child of removed object");
                    pending.discard(&child.id);
                    gone.insert(child.id);
                }
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}
