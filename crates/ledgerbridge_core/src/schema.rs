//! Entity schema.
//!
//! The schema lists every entity the store knows: its attribute names (the
//! field-name mapping the codec uses), its identity attribute, the
//! attributes free-text search looks at, and its to-one relationships with
//! their delete rules.

use crate::error::{CoreError, CoreResult};
use crate::model::{Account, Entity, Transaction};

/// What happens to a child when the object its relationship points at is
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRule {
    /// Delete the child as well.
    Cascade,
    /// Clear the child's back-reference.
    Nullify,
    /// Refuse to delete the parent while children exist.
    Deny,
}

/// A to-one relationship from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescription {
    /// Relationship name, e.g. `account`.
    pub name: String,
    /// Entity the relationship points at.
    pub destination: String,
    /// Rule applied when the destination object is deleted.
    pub delete_rule: DeleteRule,
}

/// Description of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescription {
    /// Entity name.
    pub name: String,
    /// Declared attribute names, in declaration order.
    pub attributes: Vec<String>,
    /// Attribute acting as natural key for upsert and uniqueness.
    pub identity: Option<String>,
    /// Attributes searched by free-text queries.
    pub searchable: Vec<String>,
    /// To-one relationships.
    pub relationships: Vec<RelationshipDescription>,
}

impl EntityDescription {
    /// Creates an empty description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            identity: None,
            searchable: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Declares an attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    /// Marks an attribute as the identity key.
    #[must_use]
    pub fn identity(mut self, name: impl Into<String>) -> Self {
        self.identity = Some(name.into());
        self
    }

    /// Adds an attribute to the free-text search set.
    #[must_use]
    pub fn searchable(mut self, name: impl Into<String>) -> Self {
        self.searchable.push(name.into());
        self
    }

    /// Declares a to-one relationship.
    #[must_use]
    pub fn relationship(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        delete_rule: DeleteRule,
    ) -> Self {
        self.relationships.push(RelationshipDescription {
            name: name.into(),
            destination: destination.into(),
            delete_rule,
        });
        self
    }

    /// Returns true when `name` is a declared attribute.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
    }

    /// Looks up a relationship by name.
    #[must_use]
    pub fn relationship_named(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

/// The set of entities a store can hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entities: Vec<EntityDescription>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The account/transaction schema.
    #[must_use]
    pub fn ledger() -> Self {
        Self::new().with_entity::<Account>().with_entity::<Transaction>()
    }

    /// Registers a description, replacing one with the same name.
    #[must_use]
    pub fn entity(mut self, description: EntityDescription) -> Self {
        self.entities.retain(|e| e.name != description.name);
        self.entities.push(description);
        self
    }

    /// Registers the description of a typed entity.
    #[must_use]
    pub fn with_entity<T: Entity>(self) -> Self {
        self.entity(T::description())
    }

    /// Looks up an entity by name.
    #[must_use]
    pub fn describe(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Iterates registered descriptions.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDescription> {
        self.entities.iter()
    }

    /// Iterates relationships that point at `destination`, with their owner.
    pub fn inbound<'a>(
        &'a self,
        destination: &'a str,
    ) -> impl Iterator<Item = (&'a EntityDescription, &'a RelationshipDescription)> + 'a {
        self.entities.iter().flat_map(move |entity| {
            entity
                .relationships
                .iter()
                .filter(move |r| r.destination == destination)
                .map(move |r| (entity, r))
        })
    }

    /// Checks that every reference inside the schema resolves.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` naming the first dangling reference.
    pub fn validate(&self) -> CoreResult<()> {
        for entity in &self.entities {
            if let Some(identity) = &entity.identity {
                if !entity.has_attribute(identity) {
                    return Err(CoreError::invalid_request(format!(
                        "{}: identity `{identity}` is not an attribute",
                        entity.name
                    )));
                }
            }
            if let Some(field) = entity.searchable.iter().find(|s| !entity.has_attribute(s)) {
                return Err(CoreError::invalid_request(format!(
                    "{}: searchable `{field}` is not an attribute",
                    entity.name
                )));
            }
            for relationship in &entity.relationships {
                if self.describe(&relationship.destination).is_none() {
                    return Err(CoreError::invalid_request(format!(
                        "{}.{} points at unknown entity {}",
                        entity.name, relationship.name, relationship.destination
                    )));
                }
            }
        }
        Ok(())
    }
}
