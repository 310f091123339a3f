use crate::model::{Entity, ObjectRef};
use crate::schema::EntityDescription;

/// A financial account. Owns zero or more transactions.
///
/// The owned collection is not stored on the account; it is the set of
/// transactions whose `account` back-reference points here, see
/// [`crate::RelationshipResolver::children`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    binding: ObjectRef,
    /// Caller-supplied identifier (`uId`).
    pub uid: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Masked account number.
    pub mask: Option<String>,
}

impl Entity for Account {
    const ENTITY_NAME: &'static str = "Account";
    const ATTRIBUTES: &'static [&'static str] = &["uId", "name", "mask"];

    fn description() -> EntityDescription {
        EntityDescription::new(Self::ENTITY_NAME)
            .attribute("uId")
            .attribute("name")
            .attribute("mask")
            .identity("uId")
            .searchable("name")
            .searchable("mask")
    }

    fn bind(binding: ObjectRef) -> Self {
        Self {
            binding,
            uid: None,
            name: None,
            mask: None,
        }
    }

    fn binding(&self) -> ObjectRef {
        self.binding
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "uId" => self.uid.as_deref(),
            "name" => self.name.as_deref(),
            "mask" => self.mask.as_deref(),
            _ => None,
        }
    }

    fn set_attribute(&mut self, key: &str, value: Option<String>) {
        match key {
            "uId" => self.uid = value,
            "name" => self.name = value,
            "mask" => self.mask = value,
            _ => {}
        }
    }
}
