//! Typed queries and writes against a context.
//!
//! ```rust,ignore
//! use ledgerbridge_core::{Account, Predicate, SortDescriptor};
//!
//! let ctx = store.foreground_context();
//! let found: Vec<Account> = ctx.insert_or_fetch(Some(&Predicate::eq("uId", "A1")))?;
//! let sorted: Vec<Account> = ctx.fetch(None, &[SortDescriptor::ascending("name")])?;
//! ```

use crate::codec::{self, Record};
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::model::{check_coercible, materialize, write_back, Entity};
use crate::object::{ObjectId, StoredObject};
use crate::predicate::Predicate;
use crate::schema::EntityDescription;
use std::cmp::Ordering;
use std::collections::HashSet;
use serde_json::Value;
use tracing::{debug, warn};

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    /// Attribute to sort by.
    pub key: String,
    /// Direction.
    pub ascending: bool,
}

impl SortDescriptor {
    /// Ascending on `key`; unset values first.
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    /// Descending on `key`; unset values last.
    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }

    fn compare(&self, a: &StoredObject, b: &StoredObject) -> Ordering {
        let ordering = a.attribute(&self.key).cmp(&b.attribute(&self.key));
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

impl Context {
    /// Entities of `T` matching `predicate` (all of them when `None`),
    /// ordered by `sort` and then by creation order.
    ///
    /// # Errors
    ///
    /// Returns `DataFetchFailed` when `T` is not in the schema, when stored
    /// objects cannot be read as `T`, or when the predicate or a sort key
    /// names an unknown field.
    pub fn fetch<T: Entity>(
        &self,
        predicate: Option<&Predicate>,
        sort: &[SortDescriptor],
    ) -> CoreResult<Vec<T>> {
        Ok(self
            .sorted::<T>(predicate, sort)?
            .iter()
            .map(|object| materialize(self.id(), object))
            .collect())
    }

    /// Distinct projections of the entities of `T` matching `predicate`.
    ///
    /// Each record holds exactly the requested attributes, unset ones as
    /// `null`; an empty `properties` selects every declared attribute. Rows
    /// follow `sort`, and a row equal to an earlier one is dropped.
    ///
    /// # Errors
    ///
    /// Returns `DataFetchFailed` for an unknown property, or any
    /// [`Self::fetch`] error.
    pub fn fetch_records<T: Entity>(
        &self,
        predicate: Option<&Predicate>,
        sort: &[SortDescriptor],
        properties: &[&str],
    ) -> CoreResult<Vec<Record>> {
        let description = self.fetch_description::<T>()?;
        if let Some(unknown) = properties.iter().find(|p| !description.has_attribute(p)) {
            return Err(CoreError::data_fetch_failed(format!(
                "cannot project {} onto unknown attribute `{unknown}`",
                T::ENTITY_NAME
            )));
        }
        let columns: Vec<&str> = if properties.is_empty() {
            T::ATTRIBUTES.to_vec()
        } else {
            properties.to_vec()
        };

        let objects = self.sorted::<T>(predicate, sort)?;
        let mut seen = HashSet::new();
        let records: Vec<Record> = objects
            .iter()
            .filter(|object| {
                let row: Vec<Option<&str>> = columns.iter().map(|c| object.attribute(c)).collect();
                seen.insert(row)
            })
            .map(|object| {
                columns
                    .iter()
                    .map(|&column| {
                        let value = object
                            .attribute(column)
                            .map_or(Value::Null, |v| Value::String(v.to_string()));
                        (column.to_string(), value)
                    })
                    .collect()
            })
            .collect();
        debug!(
            context = %self.id(),
            entity = T::ENTITY_NAME,
            matched = objects.len(),
            distinct = records.len(),
            "projection fetched"
        );
        Ok(records)
    }

    /// First entity matching `predicate` in creation order.
    ///
    /// # Errors
    ///
    /// Returns `NoData` when nothing matches, or any [`Self::fetch`] error.
    pub fn fetch_one<T: Entity>(&self, predicate: Option<&Predicate>) -> CoreResult<T> {
        let object = self
            .matching::<T>(predicate)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CoreError::no_data(match predicate {
                    Some(p) => format!("no {} matches {p}", T::ENTITY_NAME),
                    None => format!("no {} exists", T::ENTITY_NAME),
                })
            })?;
        Ok(materialize(self.id(), &object))
    }

    /// Number of entities matching `predicate`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub fn count<T: Entity>(&self, predicate: Option<&Predicate>) -> CoreResult<usize> {
        Ok(self.matching::<T>(predicate)?.len())
    }

    /// Re-fetches an entity by id, as this context sees it.
    ///
    /// This is how entities cross contexts: hand over the id, not the entity.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub fn object<T: Entity>(&self, id: ObjectId) -> CoreResult<Option<T>> {
        self.fetch_description::<T>()?;
        Ok(self
            .lookup(id)?
            .filter(|object| object.entity == T::ENTITY_NAME)
            .map(|object| materialize(self.id(), &object)))
    }

    /// Creates one empty entity of `T`, pending in this context.
    ///
    /// # Errors
    ///
    /// Returns `DataFetchFailed` when `T` is not in the schema.
    pub fn insert<T: Entity>(&self) -> CoreResult<T> {
        self.fetch_description::<T>()?;
        self.create::<T>(None)
    }

    /// Find-or-create.
    ///
    /// Without a predicate, creates one new empty entity. With one, returns
    /// the existing matches, or creates exactly one entity seeded with the
    /// predicate's top-level equality values when nothing matches. A second
    /// call with the same predicate in the same context finds that entity.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub fn insert_or_fetch<T: Entity>(&self, predicate: Option<&Predicate>) -> CoreResult<Vec<T>> {
        let Some(predicate) = predicate else {
            return Ok(vec![self.insert::<T>()?]);
        };
        let found = self.fetch::<T>(Some(predicate), &[])?;
        if !found.is_empty() {
            return Ok(found);
        }
        debug!(context = %self.id(), entity = T::ENTITY_NAME, %predicate, "no match; creating");
        Ok(vec![self.create::<T>(Some(predicate))?])
    }

    /// Finds the entity with the record's identity value, creating it when
    /// missing, and copies the record's declared fields onto it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when `T` has no identity attribute, when the
    /// record lacks a string identity value, or when a field has the wrong
    /// type. Nothing is staged on error.
    pub fn upsert_record<T: Entity>(&self, record: &Record) -> CoreResult<T> {
        let description = self.fetch_description::<T>()?;
        let key = description.identity.clone().ok_or_else(|| {
            CoreError::invalid_request(format!("{} has no identity attribute", T::ENTITY_NAME))
        })?;
        let fields = codec::read_fields::<T>(record)?;
        let uid = fields
            .iter()
            .find(|(name, _)| *name == key)
            .and_then(|(_, value)| value.clone())
            .ok_or_else(|| {
                CoreError::invalid_request(format!(
                    "{} record has no `{key}` value",
                    T::ENTITY_NAME
                ))
            })?;

        let mut entity = self
            .insert_or_fetch::<T>(Some(&Predicate::eq(key, uid)))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::no_data(format!("upsert of {} returned nothing", T::ENTITY_NAME)))?;
        for (name, value) in fields {
            entity.set_attribute(name, value);
        }
        self.update(&entity)?;
        Ok(entity)
    }

    /// Free-text search over the searchable fields of `T`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub fn search<T: Entity>(&self, text: &str) -> CoreResult<Vec<T>> {
        let keys = self.fetch_description::<T>()?.searchable.clone();
        self.fetch(Some(&Predicate::search(text, &keys)), &[])
    }

    /// Stages the entity's current field values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an entity from another context or one
    /// that no longer exists in this context.
    pub fn update<T: Entity>(&self, entity: &T) -> CoreResult<()> {
        self.check_binding(entity)?;
        let mut object = self.lookup(entity.id())?.ok_or_else(|| {
            CoreError::invalid_request(format!(
                "{} {} no longer exists",
                T::ENTITY_NAME,
                entity.id()
            ))
        })?;
        write_back(entity, &mut object);
        self.stage(object)
    }

    /// Stages removal of one entity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an entity from another context.
    pub fn remove<T: Entity>(&self, entity: &T) -> CoreResult<()> {
        self.check_binding(entity)?;
        self.stage_delete(entity.id())
    }

    /// Deletes every entity of `T` matching `predicate` through this
    /// context, then saves. `None` deletes all entities of `T`.
    ///
    /// Returns the number of matched entities.
    ///
    /// # Errors
    ///
    /// Returns the fetch or save failure; the context is rolled back.
    pub fn delete<T: Entity>(&self, predicate: Option<&Predicate>) -> CoreResult<usize> {
        if predicate.is_none() {
            warn!(context = %self.id(), entity = T::ENTITY_NAME, "delete without predicate removes every entity");
        }
        let outcome = self.matching::<T>(predicate).and_then(|objects| {
            for object in &objects {
                self.stage_delete(object.id)?;
            }
            self.try_save()?;
            Ok(objects.len())
        });
        if outcome.is_err() {
            self.rollback();
        }
        outcome
    }

    /// Deletes every committed entity of `T` matching `predicate` directly in
    /// the store, then saves the context. Unsaved entities are not
    /// considered.
    ///
    /// Pending edits to anything the delete removed, cascaded children
    /// included, are dropped first. Staged objects pointing at a removed
    /// object follow the relationship's delete rule.
    ///
    /// Returns the number of matched entities.
    ///
    /// # Errors
    ///
    /// Returns the fetch, delete or save failure; the context is rolled
    /// back.
    pub fn batch_delete<T: Entity>(&self, predicate: Option<&Predicate>) -> CoreResult<usize> {
        if predicate.is_none() {
            warn!(context = %self.id(), entity = T::ENTITY_NAME, "batch delete without predicate removes every entity");
        }
        let outcome = self.fetch_description::<T>().and_then(|description| {
            if let Some(predicate) = predicate {
                predicate.validate(description)?;
            }
            let deletion = self.coordinator().delete_matching(
                T::ENTITY_NAME,
                predicate,
                self.save_timeout(),
            )?;
            debug!(
                context = %self.id(),
                entity = T::ENTITY_NAME,
                matched = deletion.matched,
                removed = deletion.removed.len(),
                "batch delete committed"
            );
            self.forget_removed(&deletion.removed);
            self.try_save()?;
            Ok(deletion.matched)
        });
        if outcome.is_err() {
            self.rollback();
        }
        outcome
    }

    fn fetch_description<T: Entity>(&self) -> CoreResult<&EntityDescription> {
        let description = self.describe(T::ENTITY_NAME).ok_or_else(|| {
            CoreError::data_fetch_failed(format!("{} is not part of the store schema", T::ENTITY_NAME))
        })?;
        check_coercible::<T>(description)?;
        Ok(description)
    }

    /// Matching objects of `T` ordered by `sort`, then by creation order.
    fn sorted<T: Entity>(
        &self,
        predicate: Option<&Predicate>,
        sort: &[SortDescriptor],
    ) -> CoreResult<Vec<StoredObject>> {
        let description = self.fetch_description::<T>()?;
        if let Some(descriptor) = sort.iter().find(|d| !description.has_attribute(&d.key)) {
            return Err(CoreError::data_fetch_failed(format!(
                "cannot sort {} by unknown attribute `{}`",
                T::ENTITY_NAME,
                descriptor.key
            )));
        }

        let mut objects = self.matching::<T>(predicate)?;
        if !sort.is_empty() {
            objects.sort_by(|a, b| {
                sort.iter()
                    .map(|d| d.compare(a, b))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }
        Ok(objects)
    }

    /// Validated, filtered objects of `T` in creation order.
    fn matching<T: Entity>(&self, predicate: Option<&Predicate>) -> CoreResult<Vec<StoredObject>> {
        let description = self.fetch_description::<T>()?;
        if let Some(predicate) = predicate {
            predicate.validate(description)?;
        }
        let mut objects = self.objects_of(T::ENTITY_NAME)?;
        if let Some(predicate) = predicate {
            objects.retain(|object| predicate.evaluate(object));
        }
        Ok(objects)
    }

    fn create<T: Entity>(&self, seed: Option<&Predicate>) -> CoreResult<T> {
        let mut object = self.new_object(T::ENTITY_NAME);
        if let Some(predicate) = seed {
            predicate.seed(&mut object);
        }
        let entity = materialize(self.id(), &object);
        self.stage(object)?;
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Account, Transaction};
    use crate::store::PersistentStore;

    fn account(ctx: &Context, uid: &str, name: Option<&str>) -> Account {
        let mut account = ctx
            .insert_or_fetch::<Account>(Some(&Predicate::eq("uId", uid)))
            .unwrap()
            .remove(0);
        account.name = name.map(str::to_string);
        ctx.update(&account).unwrap();
        account
    }

    #[test]
    fn insert_or_fetch_is_idempotent() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        let predicate = Predicate::eq("uId", "A1");

        let first: Vec<Account> = ctx.insert_or_fetch(Some(&predicate)).unwrap();
        let second: Vec<Account> = ctx.insert_or_fetch(Some(&predicate)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id(), second[0].id());
        assert_eq!(first[0].uid.as_deref(), Some("A1"));
        assert_eq!(ctx.count::<Account>(None).unwrap(), 1);
    }

    #[test]
    fn insert_or_fetch_without_predicate_always_creates() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        ctx.insert_or_fetch::<Account>(None).unwrap();
        ctx.insert_or_fetch::<Account>(None).unwrap();
        assert_eq!(ctx.count::<Account>(None).unwrap(), 2);
    }

    #[test]
    fn fetch_sorts_stably_with_unset_first() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        account(ctx, "A1", Some("b"));
        account(ctx, "A2", None);
        account(ctx, "A3", Some("a"));
        account(ctx, "A4", Some("b"));

        let uids = |accounts: Vec<Account>| -> Vec<String> {
            accounts.into_iter().filter_map(|a| a.uid).collect()
        };
        let ascending = ctx.fetch::<Account>(None, &[SortDescriptor::ascending("name")]).unwrap();
        assert_eq!(uids(ascending), ["A2", "A3", "A1", "A4"]);

        let descending = ctx
            .fetch::<Account>(None, &[SortDescriptor::descending("name")])
            .unwrap();
        assert_eq!(uids(descending), ["A1", "A4", "A3", "A2"]);
    }

    #[test]
    fn unknown_keys_fail_fetch() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        assert!(matches!(
            ctx.fetch::<Account>(None, &[SortDescriptor::ascending("location")]),
            Err(CoreError::DataFetchFailed { .. })
        ));
        assert!(matches!(
            ctx.fetch::<Account>(Some(&Predicate::eq("location", "x")), &[]),
            Err(CoreError::DataFetchFailed { .. })
        ));
    }

    #[test]
    fn fetch_one_reports_no_data() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        assert!(matches!(
            ctx.fetch_one::<Account>(Some(&Predicate::eq("uId", "missing"))),
            Err(CoreError::NoData { .. })
        ));
    }

    #[test]
    fn update_rejects_foreign_entities() {
        let store = PersistentStore::open_in_memory().unwrap();
        let foreground = store.foreground_context();
        let entity = account(foreground, "A1", Some("Checking"));
        assert!(foreground.save());

        let background = store.new_background_context().unwrap();
        let result = background.perform_and_wait(move |ctx| ctx.update(&entity)).unwrap();
        assert!(matches!(result, Err(CoreError::InvalidRequest { .. })));
    }

    #[test]
    fn object_crosses_contexts_by_id() {
        let store = PersistentStore::open_in_memory().unwrap();
        let id = store
            .perform_background_task(|ctx| {
                let entity = account(ctx, "A1", Some("Checking"));
                assert!(ctx.save());
                entity.id()
            })
            .unwrap();
        let found: Account = store.foreground_context().object(id).unwrap().unwrap();
        assert_eq!(found.name.as_deref(), Some("Checking"));
        assert!(store
            .foreground_context()
            .object::<Transaction>(id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_removes_only_matches() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        account(ctx, "A1", Some("Checking"));
        account(ctx, "A2", Some("Savings"));
        assert!(ctx.save());

        assert_eq!(ctx.delete::<Account>(Some(&Predicate::eq("name", "Savings"))).unwrap(), 1);
        let left: Vec<Account> = ctx.fetch(None, &[]).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].uid.as_deref(), Some("A1"));
    }

    #[test]
    fn batch_delete_drops_pending_edits_to_deleted() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        let mut a1 = account(ctx, "A1", Some("Checking"));
        account(ctx, "A2", Some("Savings"));
        assert!(ctx.save());

        a1.mask = Some("9999".into());
        ctx.update(&a1).unwrap();
        let unsaved = account(ctx, "A3", Some("Brokerage"));

        assert_eq!(ctx.batch_delete::<Account>(None).unwrap(), 2);
        let left: Vec<Account> = ctx.fetch(None, &[]).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), unsaved.id());
        assert!(!ctx.has_changes());
    }

    #[test]
    fn batch_delete_drops_pending_edits_to_cascaded_children() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        let parent = account(ctx, "A1", Some("Checking"));
        let mut child: Transaction = ctx
            .insert_or_fetch(Some(&Predicate::eq("uId", "T1")))
            .unwrap()
            .remove(0);
        child.set_relation("account", Some(parent.id()));
        ctx.update(&child).unwrap();
        assert!(ctx.save());

        child.name = Some("Edited".into());
        ctx.update(&child).unwrap();
        let mut unsaved: Transaction = ctx
            .insert_or_fetch(Some(&Predicate::eq("uId", "T2")))
            .unwrap()
            .remove(0);
        unsaved.set_relation("account", Some(parent.id()));
        ctx.update(&unsaved).unwrap();

        assert_eq!(
            ctx.batch_delete::<Account>(Some(&Predicate::eq("uId", "A1")))
                .unwrap(),
            1
        );
        assert_eq!(ctx.count::<Transaction>(None).unwrap(), 0);
        assert!(!ctx.has_changes());
        assert_eq!(store.object_count().unwrap(), 0);
    }

    #[test]
    fn upsert_record_updates_in_place() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        let mut record = Record::new();
        record.insert("uId".into(), "A1".into());
        record.insert("name".into(), "Checking".into());
        let first: Account = ctx.upsert_record(&record).unwrap();

        record.insert("name".into(), "Everyday".into());
        let second: Account = ctx.upsert_record(&record).unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(
            ctx.fetch_one::<Account>(None).unwrap().name.as_deref(),
            Some("Everyday")
        );

        let mut missing = Record::new();
        missing.insert("name".into(), "No id".into());
        assert!(matches!(
            ctx.upsert_record::<Account>(&missing),
            Err(CoreError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn fetch_records_projects_distinct_rows() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        account(ctx, "A1", Some("Savings"));
        account(ctx, "A2", Some("Checking"));
        account(ctx, "A3", Some("Savings"));
        account(ctx, "A4", None);

        let names = ctx
            .fetch_records::<Account>(None, &[SortDescriptor::ascending("name")], &["name"])
            .unwrap();
        let names: Vec<Value> = names.into_iter().map(|mut r| r.remove("name").unwrap()).collect();
        assert_eq!(names, [Value::Null, Value::from("Checking"), Value::from("Savings")]);

        let rows = ctx
            .fetch_records::<Account>(Some(&Predicate::eq("name", "Savings")), &[], &["uId", "name"])
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[0]["uId"], "A1");
        assert!(!rows[0].contains_key("mask"));
    }

    #[test]
    fn fetch_records_defaults_to_every_attribute() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        account(ctx, "A1", Some("Checking"));

        let rows = ctx.fetch_records::<Account>(None, &[], &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["uId"], "A1");
        assert_eq!(rows[0]["name"], "Checking");
        assert_eq!(rows[0]["mask"], Value::Null);
    }

    #[test]
    fn fetch_records_rejects_unknown_properties() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        account(ctx, "A1", Some("Checking"));
        assert!(matches!(
            ctx.fetch_records::<Account>(None, &[], &["name", "location"]),
            Err(CoreError::DataFetchFailed { .. })
        ));
        assert!(matches!(
            ctx.fetch_records::<Account>(None, &[SortDescriptor::ascending("location")], &["name"]),
            Err(CoreError::DataFetchFailed { .. })
        ));
    }

    #[test]
    fn search_uses_searchable_fields() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ctx = store.foreground_context();
        account(ctx, "A1", Some("Everyday Checking"));
        account(ctx, "A2", Some("Savings"));

        let found: Vec<Account> = ctx.search("checking").unwrap();
        assert_eq!(found.len(), 1);
        // uId is not searchable
        assert!(ctx.search::<Account>("A2").unwrap().is_empty());
    }
}
