//! StateStore: redb-backed record persistence for the runner pool.
//!
//! Provides single-item get/put/update/delete with optional condition
//! expressions, plus a filtered partition query. redb admits one write
//! transaction at a time, so reading the current item, checking the
//! condition and writing the new value inside one transaction is an atomic
//! compare-and-swap on that item. Reads only ever observe committed data.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde_json::Value;
use tracing::debug;

use crate::condition::{Assignment, Condition};
use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

pub(crate) use map_err;

/// `(entity_type, identifier)` pair addressing one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub entity: String,
    pub id: String,
}

impl RecordKey {
    pub fn new(entity: &str, id: &str) -> Self {
        Self {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    fn partition_prefix(entity: &str) -> String {
        format!("{entity}#")
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// What a conditional write does to the stored item once its check passes.
enum Mutation {
    Put(Value),
    Remove,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.open_table(QUEUES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Records ────────────────────────────────────────────────────

    /// Get the current item for a key.
    pub fn get_item(&self, key: &RecordKey) -> StateResult<Option<Value>> {
        let storage_key = key.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        match table.get(storage_key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let item: Value =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Write a whole item, optionally conditioned on the current one.
    pub fn put_item(
        &self,
        key: &RecordKey,
        item: &Value,
        condition: Option<&Condition>,
    ) -> StateResult<()> {
        self.conditional_write(key, |current| {
            check(key, condition, current.as_ref())?;
            Ok((Some(Mutation::Put(item.clone())), ()))
        })?;
        debug!(%key, "item stored");
        Ok(())
    }

    /// Apply assignments to an existing item when the condition holds.
    ///
    /// Returns the item as written. An absent item never satisfies the
    /// update, whatever the condition says.
    pub fn update_item(
        &self,
        key: &RecordKey,
        condition: &Condition,
        set: &[Assignment],
    ) -> StateResult<Value> {
        let updated = self.conditional_write(key, |current| {
            let Some(mut item) = current else {
                return Err(condition_failed(key));
            };
            check(key, Some(condition), Some(&item))?;
            let Some(fields) = item.as_object_mut() else {
                return Err(StateError::Deserialize(format!("{key} is not an object")));
            };
            for assignment in set {
                fields.insert(assignment.attr.clone(), assignment.value.clone());
            }
            Ok((Some(Mutation::Put(item.clone())), item))
        })?;
        debug!(%key, "item updated");
        Ok(updated)
    }

    /// Delete an item, optionally conditioned on the current one.
    ///
    /// Returns true if an item was removed.
    pub fn delete_item(&self, key: &RecordKey, condition: Option<&Condition>) -> StateResult<bool> {
        let existed = self.conditional_write(key, |current| {
            check(key, condition, current.as_ref())?;
            let existed = current.is_some();
            Ok((existed.then_some(Mutation::Remove), existed))
        })?;
        debug!(%key, existed, "item deleted");
        Ok(existed)
    }

    /// All items of one entity type matching `filter`.
    pub fn query_items(&self, entity: &str, filter: &Condition) -> StateResult<Vec<Value>> {
        let prefix = RecordKey::partition_prefix(entity);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let item: Value =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if filter.evaluate(Some(&item)) {
                results.push(item);
            }
        }
        Ok(results)
    }

    /// Read the current item, let `decide` check it, then apply the chosen
    /// mutation in the same write transaction. An error from `decide` aborts
    /// the transaction untouched.
    fn conditional_write<R>(
        &self,
        key: &RecordKey,
        decide: impl FnOnce(Option<Value>) -> StateResult<(Option<Mutation>, R)>,
    ) -> StateResult<R> {
        let storage_key = key.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let current = table
                .get(storage_key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice::<Value>(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;
            match decide(current) {
                Ok((mutation, out)) => {
                    match mutation {
                        Some(Mutation::Put(item)) => {
                            let bytes = serde_json::to_vec(&item).map_err(map_err!(Serialize))?;
                            table
                                .insert(storage_key.as_str(), bytes.as_slice())
                                .map_err(map_err!(Write))?;
                        }
                        Some(Mutation::Remove) => {
                            table
                                .remove(storage_key.as_str())
                                .map_err(map_err!(Write))?;
                        }
                        None => {}
                    }
                    Ok(out)
                }
                Err(e) => Err(e),
            }
        };
        match outcome {
            Ok(out) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(out)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }
}

fn check(key: &RecordKey, condition: Option<&Condition>, current: Option<&Value>) -> StateResult<()> {
    match condition {
        Some(c) if !c.evaluate(current) => Err(condition_failed(key)),
        _ => Ok(()),
    }
}

fn condition_failed(key: &RecordKey) -> StateError {
    StateError::ConditionFailed {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: &str) -> RecordKey {
        RecordKey::new("instance", id)
    }

    fn idle(id: &str) -> Value {
        json!({"id": id, "state": "idle", "runId": ""})
    }

    // ── Unconditional CRUD ─────────────────────────────────────────

    #[test]
    fn put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_item(&key("i-1"), &idle("i-1"), None).unwrap();

        assert_eq!(store.get_item(&key("i-1")).unwrap(), Some(idle("i-1")));
        assert!(store.get_item(&key("i-2")).unwrap().is_none());
    }

    #[test]
    fn keys_are_scoped_by_entity() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_item(&key("i-1"), &idle("i-1"), None).unwrap();

        assert!(store.get_item(&RecordKey::new("heartbeat", "i-1")).unwrap().is_none());
        assert_eq!(key("i-1").to_string(), "instance#i-1");
    }

    #[test]
    fn delete_reports_existence() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_item(&key("i-1"), &idle("i-1"), None).unwrap();

        assert!(store.delete_item(&key("i-1"), None).unwrap());
        assert!(!store.delete_item(&key("i-1"), None).unwrap());
        assert!(store.get_item(&key("i-1")).unwrap().is_none());
    }

    // ── Conditional writes ─────────────────────────────────────────

    #[test]
    fn put_if_absent_conflicts_on_existing_key() {
        let store = StateStore::open_in_memory().unwrap();
        let cond = Condition::NotExists;

        store.put_item(&key("i-1"), &idle("i-1"), Some(&cond)).unwrap();
        let err = store
            .put_item(&key("i-1"), &json!({"id": "i-1", "state": "created"}), Some(&cond))
            .unwrap_err();

        assert!(err.is_condition_failed());
        assert_eq!(store.get_item(&key("i-1")).unwrap(), Some(idle("i-1")));
    }

    #[test]
    fn update_applies_assignments_when_condition_holds() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_item(&key("i-1"), &idle("i-1"), None).unwrap();

        let updated = store
            .update_item(
                &key("i-1"),
                &Condition::equals("state", "idle"),
                &[
                    Assignment::set("state", "claimed"),
                    Assignment::set("runId", "run-1"),
                ],
            )
            .unwrap();

        assert_eq!(updated["state"], "claimed");
        assert_eq!(updated["runId"], "run-1");
        assert_eq!(store.get_item(&key("i-1")).unwrap(), Some(updated));
    }

    #[test]
    fn update_leaves_item_untouched_on_conflict() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_item(&key("i-1"), &idle("i-1"), None).unwrap();

        let err = store
            .update_item(
                &key("i-1"),
                &Condition::equals("state", "running"),
                &[Assignment::set("state", "terminated")],
            )
            .unwrap_err();

        assert!(matches!(err, StateError::ConditionFailed { ref key } if key == "instance#i-1"));
        assert_eq!(store.get_item(&key("i-1")).unwrap(), Some(idle("i-1")));
    }

    #[test]
    fn update_of_absent_item_fails_condition() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .update_item(&key("ghost"), &Condition::all([]), &[Assignment::set("state", "idle")])
            .unwrap_err();
        assert!(err.is_condition_failed());
        assert!(store.get_item(&key("ghost")).unwrap().is_none());
    }

    #[test]
    fn conditional_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_item(&key("i-1"), &json!({"id": "i-1", "runId": "run-1"}), None)
            .unwrap();

        let err = store
            .delete_item(&key("i-1"), Some(&Condition::equals("runId", "run-2")))
            .unwrap_err();
        assert!(err.is_condition_failed());

        assert!(store
            .delete_item(&key("i-1"), Some(&Condition::equals("runId", "run-1")))
            .unwrap());
    }

    // ── Query ──────────────────────────────────────────────────────

    #[test]
    fn query_filters_within_partition() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_item(&key("i-1"), &idle("i-1"), None).unwrap();
        store
            .put_item(&key("i-2"), &json!({"id": "i-2", "state": "running"}), None)
            .unwrap();
        store
            .put_item(&RecordKey::new("signal", "i-3"), &json!({"id": "i-3", "state": "idle"}), None)
            .unwrap();

        let idle_items = store
            .query_items("instance", &Condition::equals("state", "idle"))
            .unwrap();
        assert_eq!(idle_items, vec![idle("i-1")]);

        let everything = store.query_items("instance", &Condition::all([])).unwrap();
        assert_eq!(everything.len(), 2);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_item(&key("i-1"), &idle("i-1"), None).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get_item(&key("i-1")).unwrap(), Some(idle("i-1")));
    }
}
