//! Identity-indexed, insertion-ordered record container.
//!
//! Both database variants keep their rows and documents in a [`RecordStore`].
//! Records are kept in a sequence-numbered map so enumeration always follows
//! insertion order, and a hash index maps each identity value to its slot.

use std::collections::{BTreeMap, HashMap};

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use fakedb_core::{
    error::{FakeDbError, FakeDbResult},
    record::{Record, RecordKey, describe},
};

/// Ordered records keyed by the value of one identity field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredRecords", into = "StoredRecords")]
pub struct RecordStore {
    name: String,
    id_field: String,
    records: BTreeMap<u64, Record>,
    index: HashMap<RecordKey, u64>,
    next_seq: u64,
    revision: u64,
}

impl RecordStore {
    /// Creates an empty store for the table or collection `name`.
    pub fn new(name: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: id_field.into(),
            records: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            revision: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Advances on every successful change to the stored records.
    ///
    /// Only the difference between two readings is meaningful; it is not persisted.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Returns the identity key of `record`.
    pub fn key_of(&self, record: &Record) -> FakeDbResult<RecordKey> {
        match record.get(&self.id_field) {
            Some(value) => RecordKey::try_from_bson(value, &self.name),
            None => Err(FakeDbError::InvalidArgument(format!(
                "record in {} has no '{}' field",
                self.name, self.id_field
            ))),
        }
    }

    /// Stores a new record at the end of the iteration order.
    ///
    /// Fails with [`FakeDbError::DuplicateKey`] and leaves the store unchanged if the identity is taken.
    pub fn insert(&mut self, record: Record) -> FakeDbResult<RecordKey> {
        let key = self.key_of(&record)?;

        if self.index.contains_key(&key) {
            return Err(FakeDbError::DuplicateKey(key.to_string(), self.name.clone()));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(seq, record);
        self.index.insert(key.clone(), seq);
        self.touch();

        Ok(key)
    }

    /// Returns the record with identity `id`.
    pub fn get(&self, id: &Bson) -> FakeDbResult<&Record> {
        self.seq_of(id)
            .and_then(|seq| self.records.get(&seq))
            .ok_or_else(|| self.not_found(id))
    }

    pub fn contains(&self, id: &Bson) -> bool {
        self.seq_of(id).is_some()
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.index.contains_key(key)
    }

    /// Merges `patch` into the record with identity `id` and returns the merged record.
    ///
    /// A patch that changes the identity field re-keys the record in place.
    pub fn update(&mut self, id: &Bson, patch: &Document) -> FakeDbResult<&Record> {
        let mut merged = self.get(id)?.clone();
        for (field, value) in patch {
            merged.insert(field.clone(), value.clone());
        }

        self.replace(id, merged)
    }

    /// Replaces the record with identity `id`, keeping its position in the iteration order.
    pub fn replace(&mut self, id: &Bson, record: Record) -> FakeDbResult<&Record> {
        let seq = self.seq_of(id).ok_or_else(|| self.not_found(id))?;
        let old_key = RecordKey::try_from_bson(id, &self.name)?;
        let new_key = self.key_of(&record)?;

        if new_key != old_key {
            if self.index.contains_key(&new_key) {
                return Err(FakeDbError::DuplicateKey(new_key.to_string(), self.name.clone()));
            }
            self.index.remove(&old_key);
            self.index.insert(new_key, seq);
        }
        self.touch();

        let slot = self.records.entry(seq).or_default();
        *slot = record;

        Ok(slot)
    }

    /// Removes and returns the record with identity `id`, failing if it is absent.
    pub fn delete(&mut self, id: &Bson) -> FakeDbResult<Record> {
        let key = RecordKey::from_bson(id).ok_or_else(|| self.not_found(id))?;
        let seq = self.index.remove(&key).ok_or_else(|| self.not_found(id))?;
        let record = self.records.remove(&seq).ok_or_else(|| self.not_found(id))?;
        self.touch();

        Ok(record)
    }

    /// Removes the record with identity `id` if present; returns whether anything was removed.
    pub fn remove(&mut self, id: &Bson) -> bool {
        self.delete(id).is_ok()
    }

    /// Lazily yields the records satisfying `predicate`, in insertion order.
    ///
    /// Each call starts a fresh pass over the store.
    pub fn scan<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Record> + 'a
    where
        P: Fn(&Record) -> bool + 'a,
    {
        self.records.values().filter(move |record| predicate(*record))
    }

    /// All records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Identity values in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &Bson> {
        self.records
            .values()
            .filter_map(|record| record.get(&self.id_field))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.touch();
        }
        self.records.clear();
        self.index.clear();
    }

    fn seq_of(&self, id: &Bson) -> Option<u64> {
        RecordKey::from_bson(id).and_then(|key| self.index.get(&key).copied())
    }

    fn not_found(&self, id: &Bson) -> FakeDbError {
        FakeDbError::RecordNotFound(describe(id), self.name.clone())
    }
}

/// Persisted form of a [`RecordStore`]: its records in iteration order. The index is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecords {
    name: String,
    id_field: String,
    records: Vec<Record>,
}

impl From<RecordStore> for StoredRecords {
    fn from(store: RecordStore) -> Self {
        StoredRecords {
            name: store.name,
            id_field: store.id_field,
            records: store.records.into_values().collect(),
        }
    }
}

impl TryFrom<StoredRecords> for RecordStore {
    type Error = FakeDbError;

    fn try_from(stored: StoredRecords) -> Result<Self, Self::Error> {
        let mut store = RecordStore::new(stored.name, stored.id_field);
        for record in stored.records {
            store.insert(record)?;
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{de::deserialize_from_document, doc, ser::serialize_to_document};

    fn users() -> RecordStore {
        let mut store = RecordStore::new("users", "id");
        store.insert(doc! { "id": 1, "name": "Ana" }).unwrap();
        store.insert(doc! { "id": 2, "name": "Bo" }).unwrap();
        store.insert(doc! { "id": 3, "name": "Cy" }).unwrap();
        store
    }

    #[test]
    fn insert_then_get_returns_equal_record() {
        let store = users();

        assert_eq!(store.get(&Bson::Int32(2)).unwrap(), &doc! { "id": 2, "name": "Bo" });
        assert_eq!(store.get(&Bson::Int64(2)).unwrap(), &doc! { "id": 2, "name": "Bo" });
        assert!(store.contains(&Bson::Int32(3)));
    }

    #[test]
    fn duplicate_insert_fails_and_leaves_store_unchanged() {
        let mut store = users();
        let err = store.insert(doc! { "id": 1, "name": "Other" }).unwrap_err();

        assert!(matches!(err, FakeDbError::DuplicateKey(ref id, ref name) if id == "1" && name == "users"));
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&Bson::Int32(1)).unwrap().get_str("name").unwrap(), "Ana");
    }

    #[test]
    fn missing_or_invalid_identity_is_rejected() {
        let mut store = RecordStore::new("users", "id");

        assert!(store.insert(doc! { "name": "x" }).is_err());
        assert!(store.insert(doc! { "id": 1.5 }).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn revision_tracks_successful_changes_only() {
        let mut store = users();
        let start = store.revision();

        assert!(store.insert(doc! { "id": 1 }).is_err());
        assert!(!store.remove(&Bson::Int32(9)));
        assert!(store.replace(&Bson::Int32(1), doc! { "id": 2 }).is_err());
        store.scan(|_| true).count();
        assert_eq!(store.revision(), start);

        store.update(&Bson::Int32(1), &doc! { "name": "A" }).unwrap();
        store.delete(&Bson::Int32(2)).unwrap();
        assert_eq!(store.revision(), start + 2);

        store.clear();
        store.clear();
        assert_eq!(store.revision(), start + 3);
    }

    #[test]
    fn update_merges_and_adds_fields() {
        let mut store = users();
        let updated = store.update(&Bson::Int32(1), &doc! { "name": "Ana Maria", "age": 30 }).unwrap();

        assert_eq!(updated, &doc! { "id": 1, "name": "Ana Maria", "age": 30 });
        assert!(store.update(&Bson::Int32(9), &doc! {}).unwrap_err().is_not_found());
    }

    #[test]
    fn rekeying_keeps_position_and_checks_collisions() {
        let mut store = users();

        assert!(matches!(
            store.update(&Bson::Int32(1), &doc! { "id": 2 }),
            Err(FakeDbError::DuplicateKey(_, _))
        ));

        store.update(&Bson::Int32(1), &doc! { "id": 10 }).unwrap();
        assert!(!store.contains(&Bson::Int32(1)));
        assert_eq!(store.ids().cloned().collect::<Vec<_>>(), vec![Bson::Int32(10), Bson::Int32(2), Bson::Int32(3)]);
    }

    #[test]
    fn strict_delete_and_idempotent_remove() {
        let mut store = users();

        assert_eq!(store.delete(&Bson::Int32(2)).unwrap(), doc! { "id": 2, "name": "Bo" });
        assert!(store.delete(&Bson::Int32(2)).unwrap_err().is_not_found());
        assert!(store.remove(&Bson::Int32(3)));
        assert!(!store.remove(&Bson::Int32(3)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn scan_is_lazy_ordered_and_restartable() {
        let mut store = users();
        store.insert(doc! { "id": 0, "name": "Zed" }).unwrap();

        let names = |store: &RecordStore| {
            store
                .scan(|record| record.get_i32("id").map(|id| id != 2).unwrap_or(false))
                .map(|record| record.get_str("name").unwrap().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(names(&store), vec!["Ana", "Cy", "Zed"]);
        assert_eq!(names(&store), vec!["Ana", "Cy", "Zed"]);
        assert_eq!(store.scan(|_| true).next().unwrap().get_i32("id").unwrap(), 1);
    }

    #[test]
    fn serde_preserves_order_and_rebuilds_index() {
        let mut store = users();
        store.delete(&Bson::Int32(1)).unwrap();
        store.insert(doc! { "id": 1, "name": "Ana" }).unwrap();

        let restored: RecordStore = deserialize_from_document(serialize_to_document(&store).unwrap()).unwrap();

        assert_eq!(restored.iter().cloned().collect::<Vec<_>>(), store.iter().cloned().collect::<Vec<_>>());
        assert!(restored.contains(&Bson::Int32(1)));
        assert_eq!(restored.name(), "users");
    }

    #[test]
    fn duplicate_identities_in_persisted_form_are_rejected() {
        let stored = doc! {
            "name": "users",
            "id_field": "id",
            "records": [{ "id": 1 }, { "id": 1 }],
        };

        assert!(deserialize_from_document::<RecordStore>(stored).is_err());
    }

    #[test]
    fn clear_empties_everything() {
        let mut store = users();
        store.clear();

        assert!(store.is_empty());
        assert!(!store.contains(&Bson::Int32(1)));
        store.insert(doc! { "id": 1 }).unwrap();
    }
}
