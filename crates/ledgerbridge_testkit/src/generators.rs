//! Property-based test generators.
//!
//! Proptest strategies for records and payloads.

use ledgerbridge_core::Record;
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Generates a `uId`: a short uppercase-prefixed identifier.
pub fn arb_uid() -> impl Strategy<Value = String> {
    "[A-Z][0-9]{1,4}"
}

/// Generates a display name of one to three words.
pub fn arb_name() -> impl Strategy<Value = String> {
    vec("[A-Za-z]{1,10}", 1..=3).prop_map(|words| words.join(" "))
}

/// Generates a search token made of letters only.
pub fn arb_token() -> impl Strategy<Value = String> {
    "[a-z]{2,8}"
}

/// Generates an optional field value.
fn arb_field(value: impl Strategy<Value = String>) -> impl Strategy<Value = Option<String>> {
    prop::option::weighted(0.8, value)
}

fn insert_opt(record: &mut Record, key: &str, value: Option<String>) {
    if let Some(value) = value {
        record.insert(key.to_string(), Value::String(value));
    }
}

/// Generates an account record with a `uId` and optional other fields.
pub fn arb_account_record() -> impl Strategy<Value = Record> {
    (arb_uid(), arb_field(arb_name()), arb_field("[0-9]{4}")).prop_map(|(uid, name, mask)| {
        let mut record = Record::new();
        record.insert("uId".to_string(), Value::String(uid));
        insert_opt(&mut record, "name", name);
        insert_opt(&mut record, "mask", mask);
        record
    })
}

/// Generates a transaction record with a `uId` and optional other fields.
pub fn arb_transaction_record() -> impl Strategy<Value = Record> {
    (arb_uid(), arb_field(arb_name()), arb_field(arb_name())).prop_map(
        |(uid, name, location)| {
            let mut record = Record::new();
            record.insert("uId".to_string(), Value::String(uid));
            insert_opt(&mut record, "name", name);
            insert_opt(&mut record, "location", location);
            record
        },
    )
}

/// Generates a persist payload with up to `max_transactions` transactions
/// with distinct `uId`s.
pub fn arb_payload(max_transactions: usize) -> impl Strategy<Value = Value> {
    (
        arb_account_record(),
        btree_map(arb_uid(), arb_transaction_record(), 0..=max_transactions),
    )
        .prop_map(|(account, transactions)| {
            let transactions: Vec<Value> = transactions
                .into_iter()
                .map(|(uid, mut record)| {
                    record.insert("uId".to_string(), Value::String(uid));
                    Value::Object(record)
                })
                .collect();
            json!({ "account": account, "transactions": transactions })
        })
}

/// Generates an equality field mapping over account attributes.
pub fn arb_account_fields() -> impl Strategy<Value = BTreeMap<String, String>> {
    btree_map(
        prop::sample::select(vec!["uId", "name", "mask"]).prop_map(str::to_string),
        "[A-Za-z0-9]{1,6}",
        1..=3,
    )
}
