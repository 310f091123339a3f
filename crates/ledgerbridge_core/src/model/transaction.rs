use crate::model::{Entity, ObjectRef};
use crate::object::ObjectId;
use crate::schema::{DeleteRule, EntityDescription};

/// A transaction recorded against an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    binding: ObjectRef,
    /// Caller-supplied identifier (`uId`).
    pub uid: Option<String>,
    /// Merchant or description.
    pub name: Option<String>,
    /// Where the transaction happened.
    pub location: Option<String>,
    account: Option<ObjectId>,
}

impl Transaction {
    /// Id of the owning account, once attached.
    ///
    /// This is a lookup key, not a reference: re-fetch the account in the
    /// context you are working in.
    #[must_use]
    pub fn account(&self) -> Option<ObjectId> {
        self.account
    }
}

impl Entity for Transaction {
    const ENTITY_NAME: &'static str = "Transaction";
    const ATTRIBUTES: &'static [&'static str] = &["uId", "name", "location"];
    const RELATIONSHIPS: &'static [&'static str] = &["account"];

    fn description() -> EntityDescription {
        EntityDescription::new(Self::ENTITY_NAME)
            .attribute("uId")
            .attribute("name")
            .attribute("location")
            .identity("uId")
            .searchable("name")
            .searchable("location")
            .relationship("account", "Account", DeleteRule::Cascade)
    }

    fn bind(binding: ObjectRef) -> Self {
        Self {
            binding,
            uid: None,
            name: None,
            location: None,
            account: None,
        }
    }

    fn binding(&self) -> ObjectRef {
        self.binding
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "uId" => self.uid.as_deref(),
            "name" => self.name.as_deref(),
            "location" => self.location.as_deref(),
            _ => None,
        }
    }

    fn set_attribute(&mut self, key: &str, value: Option<String>) {
        match key {
            "uId" => self.uid = value,
            "name" => self.name = value,
            "location" => self.location = value,
            _ => {}
        }
    }

    fn relation(&self, name: &str) -> Option<ObjectId> {
        match name {
            "account" => self.account,
            _ => None,
        }
    }

    fn set_relation(&mut self, name: &str, target: Option<ObjectId>) {
        if name == "account" {
            self.account = target;
        }
    }
}
