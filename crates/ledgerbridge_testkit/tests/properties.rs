//! Property tests over the codec, upserts, predicates and deletes.

use ledgerbridge_core::codec;
use ledgerbridge_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

/// Transaction uIds owned by each account, keyed by account uId.
fn owned_transactions(ledger: &AccountLedger, accounts: &[Account]) -> BTreeMap<String, Vec<String>> {
    accounts
        .iter()
        .filter_map(|account| account.uid.clone())
        .map(|uid| {
            let owned = ledger
                .fetch_transactions(&uid)
                .unwrap()
                .into_iter()
                .filter_map(|t| t.uid)
                .collect();
            (uid, owned)
        })
        .collect()
}

fn transaction_count(ledger: &AccountLedger) -> usize {
    ledger
        .store()
        .foreground_context()
        .count::<Transaction>(None)
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn encode_reproduces_declared_fields(record in arb_account_record()) {
        let store = TestStore::memory();
        let account: Account = codec::decode(&record, Some(store.foreground_context())).unwrap();
        let encoded = codec::encode(&account);

        for key in <Account as Entity>::ATTRIBUTES {
            let expected = record.get(*key).cloned().unwrap_or(Value::Null);
            prop_assert_eq!(encoded.get(*key), Some(&expected));
        }
    }

    #[test]
    fn persist_is_idempotent(payload in arb_payload(5)) {
        let ledger = AccountLedger::new(TestStore::memory().store);
        ledger.persist(&payload).unwrap();
        let after_first = ledger.store().object_count().unwrap();
        ledger.persist(&payload).unwrap();

        prop_assert_eq!(ledger.store().object_count().unwrap(), after_first);
        prop_assert_eq!(ledger.fetch_accounts().unwrap().len(), 1);

        let uid = payload["account"]["uId"].as_str().unwrap();
        let expected = payload["transactions"].as_array().unwrap().len();
        prop_assert_eq!(ledger.fetch_transactions(uid).unwrap().len(), expected);
    }

    #[test]
    fn adding_equality_clauses_never_widens(
        records in prop::collection::vec(arb_account_record(), 1..8),
        fields in arb_account_fields(),
    ) {
        let store = TestStore::memory();
        let ctx = store.foreground_context();
        for record in &records {
            codec::decode::<Account>(record, Some(ctx)).unwrap();
        }

        let mut clauses = Vec::new();
        let mut previous = ctx.count::<Account>(Some(&Predicate::and(clauses.clone()))).unwrap();
        prop_assert_eq!(previous, records.len());
        for (key, value) in fields {
            clauses.push(Predicate::eq(key, value));
            let narrowed = ctx.count::<Account>(Some(&Predicate::and(clauses.clone()))).unwrap();
            prop_assert!(narrowed <= previous);
            previous = narrowed;
        }
    }

    #[test]
    fn search_requires_every_token(
        name_tokens in prop::collection::vec(arb_token(), 1..4),
        missing in arb_token(),
    ) {
        prop_assume!(!name_tokens.iter().any(|t| t.contains(&missing) || missing.contains(t.as_str())));

        let ledger = AccountLedger::new(TestStore::memory().store);
        let name = name_tokens.join(" ");
        ledger
            .persist(&serde_json::json!({"account": {"uId": "A1", "name": name}}))
            .unwrap();

        let upper = name_tokens.join(" ").to_uppercase();
        prop_assert_eq!(ledger.search_accounts(&upper).unwrap().len(), 1);

        let with_missing = format!("{} {missing}", name_tokens[0]);
        prop_assert!(ledger.search_accounts(&with_missing).unwrap().is_empty());
    }

    #[test]
    fn batch_delete_removes_exactly_the_matches(
        payloads in prop::collection::vec(arb_payload(2), 1..5),
        target in 0usize..5,
    ) {
        let ledger = AccountLedger::new(TestStore::memory().store);
        for payload in &payloads {
            ledger.persist(payload).unwrap();
        }
        let before = ledger.fetch_accounts().unwrap();
        let victim = before[target % before.len()].uid.clone().unwrap();
        let owned = owned_transactions(&ledger, &before);
        let total = transaction_count(&ledger);

        let removed = ledger.delete::<Account, _, _, _>([("uId", victim.as_str())]).unwrap();
        prop_assert_eq!(removed, 1);

        let after = ledger.fetch_accounts().unwrap();
        prop_assert_eq!(after.len(), before.len() - 1);
        prop_assert!(after.iter().all(|a| a.uid.as_deref() != Some(victim.as_str())));

        let mut expected = owned.clone();
        let cascaded = expected.remove(&victim).unwrap_or_default();
        prop_assert_eq!(owned_transactions(&ledger, &after), expected);
        prop_assert_eq!(transaction_count(&ledger), total - cascaded.len());
        for uid in &cascaded {
            let left = ledger
                .store()
                .foreground_context()
                .count::<Transaction>(Some(&Predicate::eq("uId", uid.as_str())))
                .unwrap();
            prop_assert_eq!(left, 0);
        }
    }
}
