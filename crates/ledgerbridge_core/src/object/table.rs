//! Committed object table.

use crate::object::{ObjectId, StoredObject};
use std::collections::HashMap;

/// The committed state of the store: every live object by id.
///
/// Only the store coordinator mutates the table, and only while applying a
/// validated commit.
#[derive(Debug, Default, Clone)]
pub struct ObjectTable {
    objects: HashMap<ObjectId, StoredObject>,
}

impl ObjectTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an object by id.
    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&StoredObject> {
        self.objects.get(id)
    }

    /// Returns true when the id is live.
    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Inserts or replaces an object.
    pub fn put(&mut self, object: StoredObject) {
        self.objects.insert(object.id, object);
    }

    /// Removes an object, returning it if it was live.
    pub fn remove(&mut self, id: &ObjectId) -> Option<StoredObject> {
        self.objects.remove(id)
    }

    /// Iterates the objects of one entity, in no particular order.
    pub fn of_entity<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a StoredObject> + 'a {
        self.objects.values().filter(move |o| o.entity == entity)
    }

    /// Returns the number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true when the table holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns the largest creation ordinal in the table.
    #[must_use]
    pub fn max_ordinal(&self) -> u64 {
        self.objects.values().map(|o| o.ordinal).max().unwrap_or(0)
    }
}
