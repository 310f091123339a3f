//! The store coordinator: committed state, the journal, and the commit path.
//!
//! ## Concurrency
//!
//! - one committer at a time, serialized by the journal mutex
//! - readers take the table read lock and are only excluded while a
//!   validated, journaled commit is applied
//! - the sequence number only moves after the journal append succeeded

use crate::context::state::PendingChange;
use crate::error::{CoreError, CoreResult};
use crate::journal::{CommitRecord, Journal, JournalOp};
use crate::object::{ObjectId, ObjectTable, StoredObject};
use crate::predicate::Predicate;
use crate::schema::{DeleteRule, Schema};
use crate::types::{ContextId, SequenceNumber};
use ledgerbridge_storage::StorageBackend;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockUpgradableReadGuard};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns committed objects and serializes commits.
pub(crate) struct StoreCoordinator {
    schema: Schema,
    table: RwLock<ObjectTable>,
    /// Commit lock. Holding it is the right to append and apply.
    journal: Mutex<Journal>,
    committed_seq: AtomicU64,
    next_ordinal: AtomicU64,
    next_context: AtomicU64,
    closed: AtomicBool,
}

/// Blocks every commit while held. Reads continue.
///
/// Obtained from [`crate::PersistentStore::freeze_commits`].
#[must_use = "commits resume as soon as the guard is dropped"]
pub struct CommitFreeze<'a> {
    _guard: MutexGuard<'a, Journal>,
}

/// What a store-level delete committed.
#[derive(Debug)]
pub(crate) struct Deletion {
    /// Objects the predicate matched.
    pub(crate) matched: usize,
    /// Every object removed, including cascaded ones.
    pub(crate) removed: HashSet<ObjectId>,
}

impl std::fmt::Debug for CommitFreeze<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitFreeze").finish_non_exhaustive()
    }
}

impl StoreCoordinator {
    /// Replays the journal on `backend` and returns a coordinator over the
    /// recovered state.
    pub(crate) fn open(
        schema: Schema,
        backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<Self> {
        schema.validate()?;

        let mut journal = Journal::new(backend, sync_on_commit);
        let records = journal.replay()?;

        let mut table = ObjectTable::new();
        let mut committed = SequenceNumber::new(0);
        for record in &records {
            apply(&mut table, &record.ops);
            committed = record.sequence;
        }
        info!(
            commits = records.len(),
            objects = table.len(),
            committed = %committed,
            "journal replayed"
        );

        let next_ordinal = table.max_ordinal() + 1;
        Ok(Self {
            schema,
            table: RwLock::new(table),
            journal: Mutex::new(journal),
            committed_seq: AtomicU64::new(committed.as_u64()),
            next_ordinal: AtomicU64::new(next_ordinal),
            next_context: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    pub(crate) fn allocate_context(&self) -> ContextId {
        ContextId::new(self.next_context.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn allocate_ordinal(&self) -> u64 {
        self.next_ordinal.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::StoreClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs `f` against the committed table.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&ObjectTable) -> R) -> CoreResult<R> {
        self.ensure_open()?;
        Ok(f(&self.table.read()))
    }

    /// Validates and durably applies a context's change set.
    pub(crate) fn commit(
        &self,
        changes: Vec<(ObjectId, PendingChange)>,
        timeout: Option<Duration>,
    ) -> CoreResult<SequenceNumber> {
        self.commit_with(timeout, |_| Ok(changes))
            .map(|(sequence, _)| sequence)
    }

    /// Deletes every committed object of `entity` matching `predicate`,
    /// bypassing any context. Delete rules apply as for any commit.
    pub(crate) fn delete_matching(
        &self,
        entity: &str,
        predicate: Option<&Predicate>,
        timeout: Option<Duration>,
    ) -> CoreResult<Deletion> {
        let mut matched = 0;
        let (_, ops) = self.commit_with(timeout, |table| {
            let ids: Vec<ObjectId> = table
                .of_entity(entity)
                .filter(|object| predicate.map_or(true, |p| p.evaluate(object)))
                .map(|object| object.id)
                .collect();
            matched = ids.len();
            Ok(ids
                .into_iter()
                .map(|id| (id, PendingChange::Delete))
                .collect())
        })?;

        let removed = ops
            .into_iter()
            .filter_map(|op| match op {
                JournalOp::Delete(id) => Some(id),
                JournalOp::Put(_) => None,
            })
            .collect();
        Ok(Deletion { matched, removed })
    }

    /// Returns the new sequence and the journaled ops.
    fn commit_with<F>(
        &self,
        timeout: Option<Duration>,
        build: F,
    ) -> CoreResult<(SequenceNumber, Vec<JournalOp>)>
    where
        F: FnOnce(&ObjectTable) -> CoreResult<Vec<(ObjectId, PendingChange)>>,
    {
        self.ensure_open()?;

        let mut journal = match timeout {
            Some(limit) => self.journal.try_lock_for(limit).ok_or_else(|| {
                warn!(waited = ?limit, "commit lock not acquired in time");
                CoreError::Timeout { waited: limit }
            })?,
            None => self.journal.lock(),
        };
        // Close may have won the race for the lock.
        self.ensure_open()?;

        let table = self.table.upgradable_read();
        let changes = build(&table)?;
        let ops = plan(&self.schema, &table, changes)?;
        if ops.is_empty() {
            return Ok((self.committed_seq(), ops));
        }

        let record = CommitRecord {
            sequence: self.committed_seq().next(),
            ops,
        };
        journal.append(&record)?;

        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        apply(&mut table, &record.ops);
        self.committed_seq
            .store(record.sequence.as_u64(), Ordering::SeqCst);

        debug!(
            sequence = %record.sequence,
            ops = record.ops.len(),
            objects = table.len(),
            "commit applied"
        );
        Ok((record.sequence, record.ops))
    }

    /// Holds the commit lock until the guard drops.
    pub(crate) fn freeze(&self) -> CommitFreeze<'_> {
        CommitFreeze {
            _guard: self.journal.lock(),
        }
    }

    /// Syncs the journal and refuses further work. Idempotent.
    pub(crate) fn close(&self) -> CoreResult<()> {
        let mut journal = self.journal.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        journal.sync()?;
        info!(committed = %self.committed_seq(), "store closed");
        Ok(())
    }
}

impl std::fmt::Debug for StoreCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCoordinator")
            .field("committed_seq", &self.committed_seq())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn apply(table: &mut ObjectTable, ops: &[JournalOp]) {
    for op in ops {
        match op {
            JournalOp::Put(object) => table.put(object.clone()),
            JournalOp::Delete(id) => {
                table.remove(id);
            }
        }
    }
}

/// Committed table with a commit's changes laid over it. `None` in the
/// overlay marks a removal.
struct View<'a> {
    table: &'a ObjectTable,
    overlay: HashMap<ObjectId, Option<StoredObject>>,
}

impl<'a> View<'a> {
    fn get(&self, id: &ObjectId) -> Option<&StoredObject> {
        match self.overlay.get(id) {
            Some(state) => state.as_ref(),
            None => self.table.get(id),
        }
    }

    fn of_entity<'b>(&'b self, entity: &'b str) -> impl Iterator<Item = &'b StoredObject> + 'b {
        self.table
            .of_entity(entity)
            .filter(move |object| !self.overlay.contains_key(&object.id))
            .chain(self.overlay.values().flatten())
            .filter(move |object| object.entity == entity)
    }

    /// Removes `id` and applies the delete rules of relationships pointing
    /// at it.
    fn remove(&mut self, schema: &Schema, id: ObjectId) -> CoreResult<()> {
        let Some(entity) = self.get(&id).map(|object| object.entity.clone()) else {
            return Ok(());
        };
        self.overlay.insert(id, None);

        for (owner, relationship) in schema.inbound(&entity) {
            let children: Vec<StoredObject> = self
                .of_entity(&owner.name)
                .filter(|child| child.relation(&relationship.name) == Some(id))
                .cloned()
                .collect();
            for mut child in children {
                match relationship.delete_rule {
                    DeleteRule::Cascade => self.remove(schema, child.id)?,
                    DeleteRule::Nullify => {
                        child.set_relation(&relationship.name, None);
                        self.overlay.insert(child.id, Some(child));
                    }
                    DeleteRule::Deny => {
                        return Err(CoreError::constraint_violation(format!(
                            "cannot delete {entity} {id}: {}.{} still refers to it",
                            owner.name, relationship.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_relationships(&self, schema: &Schema) -> CoreResult<()> {
        for object in self.overlay.values().flatten() {
            let Some(description) = schema.describe(&object.entity) else {
                return Err(CoreError::invalid_request(format!(
                    "entity {} is not in the schema",
                    object.entity
                )));
            };
            for (name, target) in &object.relations {
                let Some(relationship) = description.relationship_named(name) else {
                    return Err(CoreError::constraint_violation(format!(
                        "{} has no relationship `{name}`",
                        object.entity
                    )));
                };
                match self.get(target) {
                    Some(found) if found.entity == relationship.destination => {}
                    _ => {
                        return Err(CoreError::constraint_violation(format!(
                            "{} {}: `{name}` points at missing {} {target}",
                            object.entity, object.id, relationship.destination
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_identities(&self, schema: &Schema) -> CoreResult<()> {
        let touched: BTreeSet<&str> = self
            .overlay
            .values()
            .flatten()
            .map(|object| object.entity.as_str())
            .collect();

        for entity in touched {
            let Some(key) = schema.describe(entity).and_then(|d| d.identity.as_deref()) else {
                continue;
            };
            let mut seen: HashMap<&str, ObjectId> = HashMap::new();
            for object in self.of_entity(entity) {
                let Some(value) = object.attribute(key) else {
                    continue;
                };
                if seen.insert(value, object.id).is_some() {
                    return Err(CoreError::UniqueConflict {
                        entity: entity.to_string(),
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Turns a change set into journal operations, enforcing delete rules,
/// relationship targets and identity uniqueness against the committed
/// table.
fn plan(
    schema: &Schema,
    table: &ObjectTable,
    changes: Vec<(ObjectId, PendingChange)>,
) -> CoreResult<Vec<JournalOp>> {
    let mut view = View {
        table,
        overlay: HashMap::new(),
    };

    let mut removals = Vec::new();
    for (id, change) in changes {
        match change {
            PendingChange::Upsert(object) => {
                view.overlay.insert(id, Some(object));
            }
            PendingChange::Delete => removals.push(id),
        }
    }
    for id in removals {
        view.remove(schema, id)?;
    }

    view.check_relationships(schema)?;
    view.check_identities(schema)?;

    let mut deletes = Vec::new();
    let mut puts = Vec::new();
    for (id, state) in view.overlay {
        match state {
            Some(object) => puts.push(object),
            None if table.contains(&id) => deletes.push(id),
            None => {}
        }
    }
    deletes.sort_by_key(|id| *id.as_bytes());
    puts.sort_by_key(|object| object.ordinal);

    Ok(deletes
        .into_iter()
        .map(JournalOp::Delete)
        .chain(puts.into_iter().map(JournalOp::Put))
        .collect())
}
