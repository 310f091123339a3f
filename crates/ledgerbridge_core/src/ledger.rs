//! Account/transaction operations for the presentation layer.
//!
//! [`AccountLedger::persist`] takes the compound payload
//!
//! ```json
//! {
//!   "account": { "uId": "A1", "name": "Checking", "mask": "1234" },
//!   "transactions": [ { "uId": "T1", "name": "Coffee", "location": "Downtown" } ]
//! }
//! ```
//!
//! and writes it on a background context in one save. Reads run on the
//! foreground context.

use crate::codec::Record;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::model::{Account, Entity, Transaction};
use crate::object::ObjectId;
use crate::predicate::Predicate;
use crate::query::SortDescriptor;
use crate::relationship::RelationshipResolver;
use crate::store::PersistentStore;
use serde_json::Value;
use tracing::{info, warn};

/// A transaction record that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFailure {
    /// Position in the payload's `transactions` array.
    pub index: usize,
    /// The record's `uId`, when it had a readable one.
    pub uid: Option<String>,
    /// Why it was rejected.
    pub reason: String,
}

/// Result of [`AccountLedger::persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The account and every transaction were saved.
    Complete {
        /// The account, bound to the foreground context.
        account: Account,
    },
    /// The account and the valid transactions were saved; the rest were
    /// rejected.
    Partial {
        /// The account, bound to the foreground context.
        account: Account,
        /// Rejected transaction records.
        failures: Vec<TransactionFailure>,
    },
}

impl PersistOutcome {
    /// The persisted account.
    #[must_use]
    pub fn account(&self) -> &Account {
        match self {
            Self::Complete { account } | Self::Partial { account, .. } => account,
        }
    }

    /// Whether every transaction was saved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// Rejected transaction records; empty when complete.
    #[must_use]
    pub fn failures(&self) -> &[TransactionFailure] {
        match self {
            Self::Complete { .. } => &[],
            Self::Partial { failures, .. } => failures,
        }
    }
}

/// The presentation-facing surface over a [`PersistentStore`].
#[derive(Debug)]
pub struct AccountLedger {
    store: PersistentStore,
}

impl AccountLedger {
    /// Wraps an open store.
    #[must_use]
    pub fn new(store: PersistentStore) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Upserts the payload's account and transactions by `uId`, attaches
    /// every transaction to the account, and saves once.
    ///
    /// Transaction records that cannot be decoded are reported in
    /// [`PersistOutcome::Partial`]; the rest are saved. A uniqueness
    /// conflict with a concurrent writer is retried once.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` when `account` is missing, not an object or has no
    ///   `uId`, or when `transactions` is present but not an array
    /// - the save failure, with nothing written
    pub fn persist(&self, payload: &Value) -> CoreResult<PersistOutcome> {
        let (account, transactions) = split_payload(payload)?;

        let mut retried = false;
        let (account_id, failures) = loop {
            let account = account.clone();
            let transactions = transactions.clone();
            let result = self
                .store
                .perform_background_task(move |ctx| write_batch(ctx, &account, &transactions))?;
            match result {
                Err(err @ CoreError::UniqueConflict { .. }) if !retried => {
                    warn!(error = %err, "persist conflicted with a concurrent save; retrying");
                    retried = true;
                }
                other => break other?,
            }
        };

        let account: Account = self
            .store
            .foreground_context()
            .object(account_id)?
            .ok_or_else(|| CoreError::no_data(format!("account {account_id} vanished after save")))?;
        info!(
            uid = account.uid.as_deref().unwrap_or_default(),
            rejected = failures.len(),
            "account persisted"
        );

        Ok(if failures.is_empty() {
            PersistOutcome::Complete { account }
        } else {
            PersistOutcome::Partial { account, failures }
        })
    }

    /// Every account, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure.
    pub fn fetch_accounts(&self) -> CoreResult<Vec<Account>> {
        self.store
            .foreground_context()
            .fetch(None, &[SortDescriptor::ascending("name")])
    }

    /// Transactions owned by the account with `account_uid`, in creation
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `NoData` when no such account exists.
    pub fn fetch_transactions(&self, account_uid: &str) -> CoreResult<Vec<Transaction>> {
        let ctx = self.store.foreground_context();
        let account: Account = ctx.fetch_one(Some(&Predicate::eq("uId", account_uid)))?;
        RelationshipResolver::new(ctx).children(&account)
    }

    /// Free-text search over account names and masks.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure.
    pub fn search_accounts(&self, text: &str) -> CoreResult<Vec<Account>> {
        self.store.foreground_context().search(text)
    }

    /// Free-text search over transaction names and locations.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure.
    pub fn search_transactions(&self, text: &str) -> CoreResult<Vec<Transaction>> {
        self.store.foreground_context().search(text)
    }

    /// Deletes entities of `T` whose fields equal every given value. An
    /// empty mapping deletes every entity of `T`.
    ///
    /// Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns `DataFetchFailed` for an unknown field, or the delete
    /// failure.
    pub fn delete<T, I, K, V>(&self, fields: I) -> CoreResult<usize>
    where
        T: Entity,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let predicate = match Predicate::from_fields(fields) {
            Predicate::And(clauses) if clauses.is_empty() => None,
            predicate => Some(predicate),
        };
        self.store
            .foreground_context()
            .batch_delete::<T>(predicate.as_ref())
    }
}

fn split_payload(payload: &Value) -> CoreResult<(Record, Vec<Value>)> {
    let account = payload
        .get("account")
        .ok_or_else(|| CoreError::invalid_request("payload has no `account`"))?
        .as_object()
        .ok_or_else(|| CoreError::invalid_request("`account` must be an object"))?
        .clone();
    let transactions = match payload.get("transactions") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(CoreError::invalid_request("`transactions` must be an array")),
    };
    Ok((account, transactions))
}

/// Runs on a background context: one save for the whole payload.
fn write_batch(
    ctx: &Context,
    account: &Record,
    transactions: &[Value],
) -> CoreResult<(ObjectId, Vec<TransactionFailure>)> {
    let outcome = stage_batch(ctx, account, transactions);
    if outcome.is_err() {
        ctx.rollback();
    }
    outcome
}

fn stage_batch(
    ctx: &Context,
    account: &Record,
    transactions: &[Value],
) -> CoreResult<(ObjectId, Vec<TransactionFailure>)> {
    let account: Account = ctx.upsert_record(account)?;
    let mut resolver = RelationshipResolver::new(ctx);
    let mut failures = Vec::new();

    for (index, value) in transactions.iter().enumerate() {
        let staged = value
            .as_object()
            .ok_or_else(|| CoreError::invalid_request("transaction record must be an object"))
            .and_then(|record| ctx.upsert_record::<Transaction>(record))
            .and_then(|mut transaction| {
                resolver
                    .attach_child(&account, &mut transaction)
                    .inspect_err(|_| ctx.revert(transaction.id()))
            });
        if let Err(err) = staged {
            warn!(index, error = %err, "transaction record rejected");
            failures.push(TransactionFailure {
                index,
                uid: value.get("uId").and_then(Value::as_str).map(str::to_string),
                reason: err.to_string(),
            });
        }
    }

    resolver.commit()?;
    Ok((account.id(), failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger() -> AccountLedger {
        AccountLedger::new(PersistentStore::open_in_memory().unwrap())
    }

    fn scenario() -> Value {
        json!({
            "account": {"uId": "A1", "name": "Checking", "mask": "1234"},
            "transactions": [{"uId": "T1", "name": "Coffee", "location": "Downtown"}]
        })
    }

    #[test]
    fn persist_links_transactions() {
        let ledger = ledger();
        let outcome = ledger.persist(&scenario()).unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.account().uid.as_deref(), Some("A1"));

        let transactions = ledger.fetch_transactions("A1").unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].uid.as_deref(), Some("T1"));
        assert_eq!(transactions[0].account(), Some(outcome.account().id()));
    }

    #[test]
    fn persist_twice_keeps_one_account() {
        let ledger = ledger();
        ledger.persist(&scenario()).unwrap();
        ledger.persist(&scenario()).unwrap();
        assert_eq!(ledger.fetch_accounts().unwrap().len(), 1);
        assert_eq!(ledger.fetch_transactions("A1").unwrap().len(), 1);
    }

    #[test]
    fn missing_account_is_invalid_request() {
        let ledger = ledger();
        let err = ledger
            .persist(&json!({"transactions": [{"uId": "T1"}]}))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
        assert_eq!(ledger.store().object_count().unwrap(), 0);
    }

    #[test]
    fn missing_transactions_means_none() {
        let ledger = ledger();
        let outcome = ledger
            .persist(&json!({"account": {"uId": "A1", "name": "Checking"}}))
            .unwrap();
        assert!(outcome.is_complete());
        assert!(ledger.fetch_transactions("A1").unwrap().is_empty());
    }

    #[test]
    fn bad_transaction_is_reported_not_swallowed() {
        let ledger = ledger();
        let outcome = ledger
            .persist(&json!({
                "account": {"uId": "A1"},
                "transactions": [
                    {"uId": "T1", "name": "Coffee"},
                    {"uId": "T2", "name": 7},
                    "not a record"
                ]
            }))
            .unwrap();
        assert!(!outcome.is_complete());
        let failures = outcome.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].uid.as_deref(), Some("T2"));
        assert_eq!(failures[1].uid, None);
        assert_eq!(ledger.fetch_transactions("A1").unwrap().len(), 1);
    }

    #[test]
    fn unattachable_transaction_is_not_saved() {
        use crate::config::Config;
        use crate::schema::{DeleteRule, EntityDescription, Schema};

        let schema = Schema::new()
            .with_entity::<Account>()
            .entity(EntityDescription::new("Vault").attribute("uId").identity("uId"))
            .entity(
                EntityDescription::new("Transaction")
                    .attribute("uId")
                    .attribute("name")
                    .attribute("location")
                    .identity("uId")
                    .relationship("account", "Vault", DeleteRule::Nullify),
            );
        let store = PersistentStore::open_with_backend(
            Config::default().sync_on_commit(false).schema(schema),
            Box::new(ledgerbridge_storage::InMemoryBackend::new()),
        )
        .unwrap();
        let ctx = store.foreground_context();
        let mut existing = Record::new();
        existing.insert("uId".into(), "T0".into());
        existing.insert("name".into(), "Old".into());
        ctx.upsert_record::<Transaction>(&existing).unwrap();
        assert!(ctx.save());

        let ledger = AccountLedger::new(store);
        let outcome = ledger
            .persist(&json!({
                "account": {"uId": "A1"},
                "transactions": [{"uId": "T0", "name": "New"}, {"uId": "T1", "name": "Coffee"}]
            }))
            .unwrap();
        assert_eq!(outcome.failures().len(), 2);
        assert_eq!(ledger.fetch_accounts().unwrap().len(), 1);

        let ctx = ledger.store().foreground_context();
        let left: Vec<Transaction> = ctx.fetch(None, &[]).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name.as_deref(), Some("Old"));
        assert!(!ctx.has_changes());
    }

    #[test]
    fn fetch_transactions_for_unknown_account_is_no_data() {
        assert!(matches!(
            ledger().fetch_transactions("nobody"),
            Err(CoreError::NoData { .. })
        ));
    }

    #[test]
    fn delete_by_fields_cascades_to_transactions() {
        let ledger = ledger();
        ledger.persist(&scenario()).unwrap();
        ledger
            .persist(&json!({"account": {"uId": "A2", "name": "Savings"}}))
            .unwrap();

        assert_eq!(ledger.delete::<Account, _, _, _>([("uId", "A1")]).unwrap(), 1);
        assert_eq!(ledger.fetch_accounts().unwrap().len(), 1);
        assert!(ledger.search_transactions("coffee").unwrap().is_empty());
    }

    #[test]
    fn search_helpers() {
        let ledger = ledger();
        ledger.persist(&scenario()).unwrap();
        assert_eq!(ledger.search_accounts("check 1234").unwrap().len(), 1);
        assert_eq!(ledger.search_transactions("COFFEE downtown").unwrap().len(), 1);
        assert!(ledger.search_transactions("coffee uptown").unwrap().is_empty());
    }
}
