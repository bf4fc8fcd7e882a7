//! Typed access to one entity type in the record store.
//!
//! `RecordTable<T>` binds the untyped JSON item operations of
//! [`StateStore`] to a single payload shape, selected by the
//! [`Record::ENTITY`] marker.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::condition::{Assignment, Condition};
use crate::error::{StateError, StateResult};
use crate::store::{RecordKey, StateStore};

/// A payload stored under its own entity type.
pub trait Record: Serialize + DeserializeOwned {
    /// Entity type half of the record key.
    const ENTITY: &'static str;

    /// Identifier half of the record key.
    fn identifier(&self) -> &str;
}

/// Typed view over the records of one entity type.
pub struct RecordTable<T> {
    store: StateStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordTable<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> RecordTable<T> {
    /// Bind `store` to entity type `T`.
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Store key of the record with identifier `id`.
    pub fn key(id: &str) -> RecordKey {
        RecordKey::new(T::ENTITY, id)
    }

    /// The underlying untyped store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Read one record, or `None` if absent.
    pub fn get(&self, id: &str) -> StateResult<Option<T>> {
        self.store.get_item(&Self::key(id))?.map(decode).transpose()
    }

    /// Write the whole record, optionally only if `condition` holds.
    pub fn put(&self, item: &T, condition: Option<&Condition>) -> StateResult<()> {
        let value = serde_json::to_value(item).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.store
            .put_item(&Self::key(item.identifier()), &value, condition)
    }

    /// Apply `set` if `condition` holds and return the updated record.
    pub fn update(&self, id: &str, condition: &Condition, set: &[Assignment]) -> StateResult<T> {
        decode(self.store.update_item(&Self::key(id), condition, set)?)
    }

    /// Delete one record. Returns whether it existed.
    pub fn delete(&self, id: &str, condition: Option<&Condition>) -> StateResult<bool> {
        self.store.delete_item(&Self::key(id), condition)
    }

    /// Every record of this entity type matching `filter`.
    pub fn query(&self, filter: &Condition) -> StateResult<Vec<T>> {
        self.store
            .query_items(T::ENTITY, filter)?
            .into_iter()
            .map(decode)
            .collect()
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> StateResult<T> {
    serde_json::from_value(value).map_err(|e| StateError::Deserialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthRecord, SignalRecord};

    #[test]
    fn typed_round_trip_per_entity() {
        let store = StateStore::open_in_memory().unwrap();
        let health = RecordTable::<HealthRecord>::new(store.clone());
        let signals = RecordTable::<SignalRecord>::new(store);

        health
            .put(
                &HealthRecord {
                    id: "i-1".to_string(),
                    updated_at: "2026-10-14T12:00:00Z".to_string(),
                },
                None,
            )
            .unwrap();

        assert_eq!(
            health.get("i-1").unwrap().map(|h| h.updated_at),
            Some("2026-10-14T12:00:00Z".to_string())
        );
        // Same identifier, different entity type.
        assert!(signals.get("i-1").unwrap().is_none());
    }

    #[test]
    fn typed_update_returns_new_payload() {
        let store = StateStore::open_in_memory().unwrap();
        let signals = RecordTable::<SignalRecord>::new(store);
        signals
            .put(
                &SignalRecord {
                    id: "i-1".to_string(),
                    state: "UD_OK".to_string(),
                    run_id: "run-1".to_string(),
                },
                None,
            )
            .unwrap();

        let updated = signals
            .update(
                "i-1",
                &Condition::equals("runId", "run-1"),
                &[Assignment::set("state", "UD_REG_OK")],
            )
            .unwrap();
        assert_eq!(updated.state, "UD_REG_OK");
        assert_eq!(signals.query(&Condition::all([])).unwrap(), vec![updated]);
    }

    #[test]
    fn typed_delete_reports_existence_and_query_stays_in_entity() {
        let store = StateStore::open_in_memory().unwrap();
        let health = RecordTable::<HealthRecord>::new(store.clone());
        let signals = RecordTable::<SignalRecord>::new(store);
        for id in ["i-1", "i-2"] {
            health
                .put(
                    &HealthRecord {
                        id: id.to_string(),
                        updated_at: "2026-10-14T12:00:00Z".to_string(),
                    },
                    None,
                )
                .unwrap();
        }

        assert!(signals.query(&Condition::all([])).unwrap().is_empty());
        assert_eq!(health.query(&Condition::equals("id", "i-2")).unwrap().len(), 1);

        assert!(health.delete("i-1", Some(&Condition::Exists)).unwrap());
        assert!(!health.delete("i-1", None).unwrap());
        assert_eq!(
            RecordTable::<HealthRecord>::key("i-2"),
            RecordKey::new("heartbeat", "i-2")
        );
    }
}
