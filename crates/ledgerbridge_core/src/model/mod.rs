//! Typed entities.
//!
//! Implement [`Entity`] to make a Rust type fetchable and insertable
//! through a [`crate::Context`]. The trait exposes attributes and
//! relationships by name so the codec and the query engine can move values
//! between typed entities, raw records and stored objects with one
//! field-name mapping.
//!
//! ```rust,ignore
//! use ledgerbridge_core::{Account, Predicate};
//!
//! let ctx = store.foreground_context();
//! let accounts: Vec<Account> = ctx.fetch(Some(&Predicate::eq("uId", "A1")), &[])?;
//! ```

mod account;
mod transaction;

pub use account::Account;
pub use transaction::Transaction;

use crate::error::{CoreError, CoreResult};
use crate::object::{ObjectId, StoredObject};
use crate::schema::EntityDescription;
use crate::types::ContextId;

/// Binding of a typed entity to its object and to the context that
/// produced it.
///
/// The binding is fixed at creation. Contexts refuse to stage an entity
/// whose binding names another context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    id: ObjectId,
    context: ContextId,
}

impl ObjectRef {
    pub(crate) fn new(id: ObjectId, context: ContextId) -> Self {
        Self { id, context }
    }

    /// The object's store id.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The context the entity belongs to.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }
}

/// A typed, context-bound view of a stored object.
pub trait Entity: Sized {
    /// Entity name in the schema.
    const ENTITY_NAME: &'static str;

    /// Scalar attributes, in wire order. This is the field-name mapping
    /// used by both decode and encode.
    const ATTRIBUTES: &'static [&'static str];

    /// Names of to-one relationships carried by the type.
    const RELATIONSHIPS: &'static [&'static str] = &[];

    /// Schema description for this entity.
    fn description() -> EntityDescription;

    /// Creates an entity with every field unset.
    fn bind(binding: ObjectRef) -> Self;

    /// Returns the entity's binding.
    fn binding(&self) -> ObjectRef;

    /// Reads an attribute by name.
    fn attribute(&self, key: &str) -> Option<&str>;

    /// Writes an attribute by name. Unknown names are ignored.
    fn set_attribute(&mut self, key: &str, value: Option<String>);

    /// Reads a relationship target by name.
    fn relation(&self, _name: &str) -> Option<ObjectId> {
        None
    }

    /// Writes a relationship target by name. Unknown names are ignored.
    fn set_relation(&mut self, _name: &str, _target: Option<ObjectId>) {}

    /// The object's store id.
    fn id(&self) -> ObjectId {
        self.binding().id()
    }
}

/// Builds a typed entity from a stored object, bound to `context`.
pub(crate) fn materialize<T: Entity>(context: ContextId, object: &StoredObject) -> T {
    let mut entity = T::bind(ObjectRef::new(object.id, context));
    for &key in T::ATTRIBUTES {
        entity.set_attribute(key, object.attribute(key).map(str::to_string));
    }
    for &name in T::RELATIONSHIPS {
        entity.set_relation(name, object.relation(name));
    }
    entity
}

/// Copies a typed entity's fields onto its stored object.
pub(crate) fn write_back<T: Entity>(entity: &T, object: &mut StoredObject) {
    for &key in T::ATTRIBUTES {
        object.set_attribute(key, entity.attribute(key).map(str::to_string));
    }
    for &name in T::RELATIONSHIPS {
        object.set_relation(name, entity.relation(name));
    }
}

/// Checks that stored objects described by `description` can be read back
/// as `T`.
pub(crate) fn check_coercible<T: Entity>(description: &EntityDescription) -> CoreResult<()> {
    let declared = T::ATTRIBUTES.len() == description.attributes.len()
        && T::ATTRIBUTES.iter().all(|a| description.has_attribute(a));
    let related = T::RELATIONSHIPS
        .iter()
        .all(|r| description.relationship_named(r).is_some());
    if declared && related {
        Ok(())
    } else {
        Err(CoreError::data_fetch_failed(format!(
            "stored {} objects cannot be read as this type",
            description.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_copies_set_fields_only() {
        let mut object = StoredObject::new(ObjectId::new(), "Account", 1);
        object.set_attribute("uId", Some("A1".into()));
        object.set_attribute("mask", Some("1234".into()));

        let account: Account = materialize(ContextId::new(1), &object);
        assert_eq!(account.uid.as_deref(), Some("A1"));
        assert_eq!(account.name, None);
        assert_eq!(account.mask.as_deref(), Some("1234"));
        assert_eq!(account.binding().context(), ContextId::new(1));
        assert_eq!(account.id(), object.id);
    }

    #[test]
    fn write_back_includes_relationships() {
        let parent = ObjectId::new();
        let mut object = StoredObject::new(ObjectId::new(), "Transaction", 2);
        let mut transaction: Transaction = materialize(ContextId::new(3), &object);
        transaction.name = Some("Coffee".into());
        transaction.set_relation("account", Some(parent));

        write_back(&transaction, &mut object);
        assert_eq!(object.attribute("name"), Some("Coffee"));
        assert_eq!(object.relation("account"), Some(parent));
    }

    #[test]
    fn coercion_requires_matching_attributes() {
        assert!(check_coercible::<Account>(&Account::description()).is_ok());
        let narrower = EntityDescription::new("Account").attribute("uId");
        assert!(matches!(
            check_coercible::<Account>(&narrower),
            Err(CoreError::DataFetchFailed { .. })
        ));
        let no_relationship = EntityDescription::new("Transaction")
            .attribute("uId")
            .attribute("name")
            .attribute("location");
        assert!(check_coercible::<Transaction>(&no_relationship).is_err());
    }
}
