//! Pending changes of a context.

use crate::object::{ObjectId, StoredObject};
use std::collections::{HashMap, HashSet};

/// An unsaved change to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingChange {
    /// Full new state of the object.
    Upsert(StoredObject),
    /// Remove a committed object.
    Delete,
}

/// Unsaved changes, keyed by object.
///
/// A later change to the same object replaces the earlier one, so each
/// object has at most one pending change.
#[derive(Debug, Default)]
pub(crate) struct PendingChanges {
    changes: HashMap<ObjectId, PendingChange>,
}

impl PendingChanges {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stages the object's new state.
    pub(crate) fn upsert(&mut self, object: StoredObject) {
        self.changes.insert(object.id, PendingChange::Upsert(object));
    }

    /// Stages removal. An object that only exists in this context is simply
    /// forgotten.
    pub(crate) fn delete(&mut self, id: ObjectId, committed: bool) {
        if committed {
            self.changes.insert(id, PendingChange::Delete);
        } else {
            self.changes.remove(&id);
        }
    }

    /// Forgets any change to `id`.
    pub(crate) fn discard(&mut self, id: &ObjectId) {
        self.changes.remove(id);
    }

    /// Staged objects with a relationship pointing into `targets`.
    pub(crate) fn referencing(&self, targets: &HashSet<ObjectId>) -> Vec<StoredObject> {
        self.changes
            .values()
            .filter_map(|change| match change {
                PendingChange::Upsert(object)
                    if object.relations.values().any(|id| targets.contains(id)) =>
                {
                    Some(object.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn get(&self, id: &ObjectId) -> Option<&PendingChange> {
        self.changes.get(id)
    }

    /// Staged objects of `entity`.
    pub(crate) fn upserts_of<'a>(
        &'a self,
        entity: &'a str,
    ) -> impl Iterator<Item = &'a StoredObject> + 'a {
        self.changes.values().filter_map(move |change| match change {
            PendingChange::Upsert(object) if object.entity == entity => Some(object),
            _ => None,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Copies the change set for a commit attempt.
    pub(crate) fn snapshot(&self) -> Vec<(ObjectId, PendingChange)> {
        self.changes
            .iter()
            .map(|(id, change)| (*id, change.clone()))
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.changes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(entity: &str) -> StoredObject {
        StoredObject::new(ObjectId::new(), entity, 1)
    }

    #[test]
    fn upsert_replaces_previous_change() {
        let mut pending = PendingChanges::new();
        let mut account = object("Account");
        pending.upsert(account.clone());
        account.set_attribute("name", Some("Checking".into()));
        pending.upsert(account.clone());

        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending.get(&account.id),
            Some(&PendingChange::Upsert(account))
        );
    }

    #[test]
    fn deleting_uncommitted_object_forgets_it() {
        let mut pending = PendingChanges::new();
        let account = object("Account");
        let id = account.id;
        pending.upsert(account);
        pending.delete(id, false);
        assert!(pending.is_empty());

        pending.delete(id, true);
        assert_eq!(pending.get(&id), Some(&PendingChange::Delete));
    }

    #[test]
    fn upserts_of_filters_entity() {
        let mut pending = PendingChanges::new();
        pending.upsert(object("Account"));
        pending.upsert(object("Transaction"));
        pending.delete(ObjectId::new(), true);
        assert_eq!(pending.upserts_of("Account").count(), 1);
        assert_eq!(pending.snapshot().len(), 3);

        pending.clear();
        assert!(pending.is_empty());
    }

    #[test]
    fn referencing_finds_staged_children() {
        let mut pending = PendingChanges::new();
        let parent = ObjectId::new();
        let mut child = object("Transaction");
        child.set_relation("account", Some(parent));
        pending.upsert(child.clone());
        pending.upsert(object("Transaction"));
        pending.delete(ObjectId::new(), true);

        assert_eq!(pending.referencing(&HashSet::from([parent])), vec![child]);
        assert!(pending.referencing(&HashSet::new()).is_empty());
    }
}
