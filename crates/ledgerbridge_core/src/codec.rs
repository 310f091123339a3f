//! Mapping between raw records and typed entities.
//!
//! A [`Record`] is a JSON object. Decoding and encoding use the entity's
//! declared attribute names ([`Entity::ATTRIBUTES`]) as the field-name
//! mapping in both directions, so `encode(decode(r))` reproduces every
//! declared field of `r`. Relationships never appear in records; they are
//! wired by [`crate::RelationshipResolver`].

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::model::{materialize, Entity};
use serde_json::Value;

/// A raw key/value record.
pub type Record = serde_json::Map<String, Value>;

/// Creates a new entity of type `T` inside `context` and copies the
/// record's declared fields onto it.
///
/// Absent and `null` fields stay unset. Undeclared keys are ignored. The
/// new entity is pending in `context` until saved.
///
/// # Errors
///
/// Returns `InvalidRequest` when `context` is `None`, when `T` is not in the
/// store's schema, or when a declared field holds something other than a
/// string or `null`. Nothing is staged on error.
pub fn decode<T: Entity>(record: &Record, context: Option<&Context>) -> CoreResult<T> {
    let context = context.ok_or_else(|| {
        CoreError::invalid_request(format!("no context to decode {} into", T::ENTITY_NAME))
    })?;
    if context.describe(T::ENTITY_NAME).is_none() {
        return Err(CoreError::invalid_request(format!(
            "{} is not part of the store schema",
            T::ENTITY_NAME
        )));
    }
    let fields = read_fields::<T>(record)?;

    let mut object = context.new_object(T::ENTITY_NAME);
    for (key, value) in fields {
        object.set_attribute(key, value);
    }
    let entity = materialize(context.id(), &object);
    context.stage(object)?;
    Ok(entity)
}

/// Produces a record with exactly the declared fields of `T`; unset fields
/// are `null`.
#[must_use]
pub fn encode<T: Entity>(entity: &T) -> Record {
    T::ATTRIBUTES
        .iter()
        .map(|&key| {
            let value = entity
                .attribute(key)
                .map_or(Value::Null, |v| Value::String(v.to_string()));
            (key.to_string(), value)
        })
        .collect()
}

/// Copies the record's present declared fields onto `entity`.
///
/// Only the in-memory value changes; stage it with
/// [`Context::update`](crate::Context::update).
///
/// # Errors
///
/// Returns `InvalidRequest` for a non-string, non-null field value, leaving
/// `entity` untouched.
pub fn apply<T: Entity>(record: &Record, entity: &mut T) -> CoreResult<()> {
    for (key, value) in read_fields::<T>(record)? {
        entity.set_attribute(key, value);
    }
    Ok(())
}

/// Extracts and type-checks the declared fields present in `record`.
pub(crate) fn read_fields<T: Entity>(
    record: &Record,
) -> CoreResult<Vec<(&'static str, Option<String>)>> {
    T::ATTRIBUTES
        .iter()
        .filter_map(|&key| record.get(key).map(|value| (key, value)))
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, Some(s.clone()))),
            Value::Null => Ok((key, None)),
            other => Err(CoreError::invalid_request(format!(
                "{}.{key} must be a string, got {other}",
                T::ENTITY_NAME
            ))),
        })
        .collect()
}
