//! Persistent objects as the coordinator stores them.
//!
//! A [`StoredObject`] is the untyped form of an entity: its entity name,
//! string attributes, and to-one relationships by target id. Typed entities
//! (`Account`, `Transaction`) are views over it produced by the codec.

mod id;
mod table;

pub use id::ObjectId;
pub use table::ObjectTable;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An untyped persistent object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Store-assigned identifier.
    pub id: ObjectId,
    /// Name of the entity description this object instantiates.
    pub entity: String,
    /// Creation ordinal; fetches without a sort return creation order.
    pub ordinal: u64,
    /// Attribute values that are set. Unset attributes are absent.
    pub attributes: BTreeMap<String, String>,
    /// To-one relationships, keyed by relationship name.
    pub relations: BTreeMap<String, ObjectId>,
}

impl StoredObject {
    /// Creates an object with no attributes or relationships.
    pub fn new(id: ObjectId, entity: impl Into<String>, ordinal: u64) -> Self {
        Self {
            id,
            entity: entity.into(),
            ordinal,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Returns an attribute value, if set.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Sets or clears an attribute.
    pub fn set_attribute(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(value) => {
                self.attributes.insert(key.to_string(), value);
            }
            None => {
                self.attributes.remove(key);
            }
        }
    }

    /// Returns the target of a relationship, if set.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<ObjectId> {
        self.relations.get(name).copied()
    }

    /// Sets or clears a relationship.
    pub fn set_relation(&mut self, name: &str, target: Option<ObjectId>) {
        match target {
            Some(target) => {
                self.relations.insert(name.to_string(), target);
            }
            None => {
                self.relations.remove(name);
            }
        }
    }
}
