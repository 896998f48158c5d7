//! The fake document database: named, schemaless collections of nested documents.

use std::collections::{BTreeMap, HashSet};

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fakedb_core::{
    error::{FakeDbError, FakeDbResult},
    query::{Expr, Query},
    record::{ID_FIELD, Record, generate_id, get_path, set_path},
    snapshot::Snapshot,
    update::Update,
};

use crate::{
    evaluator::{apply_window, matches},
    record_store::RecordStore,
};

fn default_auto_create() -> bool {
    true
}

/// An in-memory document database.
///
/// Every document carries an `_id`; one is generated when an insert omits it.
/// Collections are created on first insert unless `auto_create` is turned off.
///
/// # Example
///
/// ```ignore
/// use fakedb_memory::FakeDocumentDb;
/// use fakedb_core::query::Filter;
/// use bson::doc;
///
/// let mut db = FakeDocumentDb::new();
/// let id = db.insert_one("events", doc! { "type": "click", "meta": { "x": 1, "y": 2 } })?;
///
/// let found = db.find("events", Some(&Filter::eq("meta.x", 1)))?.collect::<Vec<_>>();
/// assert_eq!(found[0].get("_id"), Some(&id));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeDocumentDb {
    collections: BTreeMap<String, RecordStore>,
    #[serde(skip, default = "default_auto_create")]
    auto_create: bool,
}

impl Default for FakeDocumentDb {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
            auto_create: true,
        }
    }
}

impl Snapshot for FakeDocumentDb {
    const KIND: &'static str = "document";
}

impl FakeDocumentDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether inserting into a missing collection creates it.
    pub fn auto_create(&self) -> bool {
        self.auto_create
    }

    pub fn set_auto_create(&mut self, auto_create: bool) {
        self.auto_create = auto_create;
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    /// Creates an empty collection. Fails with [`FakeDbError::AlreadyExists`] if the name is taken.
    pub fn create_collection(&mut self, name: &str) -> FakeDbResult<()> {
        if name.is_empty() {
            return Err(FakeDbError::InvalidArgument("collection names must be non-empty".into()));
        }
        if self.collections.contains_key(name) {
            return Err(FakeDbError::AlreadyExists(name.to_string()));
        }

        debug!(collection = name, "creating collection");
        self.collections.insert(name.to_string(), RecordStore::new(name, ID_FIELD));

        Ok(())
    }

    pub fn drop_collection(&mut self, name: &str) -> FakeDbResult<()> {
        match self.collections.remove(name) {
            Some(_) => {
                debug!(collection = name, "dropped collection");
                Ok(())
            }
            None => Err(FakeDbError::ContainerNotFound(name.to_string())),
        }
    }

    /// Collection names in lexical order.
    pub fn list_collections(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    /// Advances whenever a document changes.
    ///
    /// Comparing two readings tells whether a call that failed part-way had
    /// already modified documents.
    pub fn revision(&self) -> u64 {
        self.collections
            .values()
            .fold(0, |total, store| total.wrapping_add(store.revision()))
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Inserts a document and returns its `_id`, generating one if absent or null.
    pub fn insert_one(&mut self, collection: &str, document: Document) -> FakeDbResult<Bson> {
        let document = with_id(document);
        let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);

        self.collection_for_insert(collection)?.insert(document)?;

        Ok(id)
    }

    /// Inserts every document or none; ids are checked against the collection and
    /// within the batch before anything is stored.
    pub fn insert_many(
        &mut self,
        collection: &str,
        documents: impl IntoIterator<Item = Document>,
    ) -> FakeDbResult<Vec<Bson>> {
        let documents = documents.into_iter().map(with_id).collect::<Vec<_>>();
        let store = self.collection_for_insert(collection)?;
        let mut seen = HashSet::new();

        for document in &documents {
            let key = store.key_of(document)?;
            if store.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(FakeDbError::DuplicateKey(key.to_string(), collection.to_string()));
            }
        }

        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(document.get(ID_FIELD).cloned().unwrap_or(Bson::Null));
            store.insert(document)?;
        }

        debug!(collection, count = ids.len(), "inserted documents");
        Ok(ids)
    }

    /// Lazily yields the documents matching `filter` in insertion order.
    ///
    /// Fails with [`FakeDbError::ContainerNotFound`] if the collection does not exist.
    pub fn find<'a>(
        &'a self,
        collection: &str,
        filter: Option<&'a Expr>,
    ) -> FakeDbResult<impl Iterator<Item = &'a Record>> {
        Ok(self
            .collection(collection)?
            .scan(move |document| matches(document, filter)))
    }

    /// The first matching document in insertion order.
    pub fn find_one(&self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<Option<&Record>> {
        Ok(self
            .collection(collection)?
            .iter()
            .find(|document| matches(document, filter)))
    }

    /// Runs a full query: filter, sort, offset, limit, then projection.
    ///
    /// A projection keeps `_id` plus the listed paths that exist in each document.
    pub fn find_query(&self, collection: &str, query: &Query) -> FakeDbResult<Vec<Record>> {
        let documents = self
            .find(collection, query.filter.as_ref())?
            .cloned()
            .collect();
        let documents = apply_window(documents, query);

        match &query.projection {
            Some(paths) => documents.iter().map(|document| project(document, paths)).collect(),
            None => Ok(documents),
        }
    }

    pub fn count_documents(&self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        Ok(self.find(collection, filter)?.count())
    }

    /// Returns the document with the given `_id`.
    pub fn get(&self, collection: &str, id: &Bson) -> FakeDbResult<&Record> {
        self.collection(collection)?.get(id)
    }

    /// Applies `update` to the first matching document; returns 0 or 1.
    pub fn update_one(&mut self, collection: &str, filter: Option<&Expr>, update: &Update) -> FakeDbResult<usize> {
        self.apply_update(collection, filter, update, Some(1))
    }

    /// Applies `update` to every matching document and returns how many were updated.
    ///
    /// A failing operation (e.g. `$inc` on text) stops the call; documents updated
    /// before it keep their changes.
    pub fn update_many(&mut self, collection: &str, filter: Option<&Expr>, update: &Update) -> FakeDbResult<usize> {
        self.apply_update(collection, filter, update, None)
    }

    /// Replaces the first matching document, keeping its `_id`; returns 0 or 1.
    pub fn replace_one(
        &mut self,
        collection: &str,
        filter: Option<&Expr>,
        replacement: Document,
    ) -> FakeDbResult<usize> {
        let Some(store) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let Some(id) = store
            .scan(|document| matches(document, filter))
            .find_map(|document| document.get(ID_FIELD).cloned())
        else {
            return Ok(0);
        };

        if replacement.get(ID_FIELD).is_some_and(|new_id| new_id != &id) {
            return Err(FakeDbError::InvalidArgument(format!(
                "replacement changes the immutable {ID_FIELD} of a document in {collection}"
            )));
        }

        let mut document = Document::new();
        document.insert(ID_FIELD, id.clone());
        for (key, value) in replacement {
            if key != ID_FIELD {
                document.insert(key, value);
            }
        }
        store.replace(&id, document)?;

        Ok(1)
    }

    pub fn delete_one(&mut self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.apply_delete(collection, filter, Some(1))
    }

    /// Removes every matching document and returns how many were removed.
    pub fn delete_many(&mut self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.apply_delete(collection, filter, None)
    }

    fn apply_update(
        &mut self,
        collection: &str,
        filter: Option<&Expr>,
        update: &Update,
        limit: Option<usize>,
    ) -> FakeDbResult<usize> {
        if update.touches(ID_FIELD) {
            return Err(FakeDbError::InvalidArgument(format!(
                "cannot modify the immutable {ID_FIELD} of documents in {collection}"
            )));
        }

        let Some(store) = self.collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut updated = 0;
        for id in matching_ids(store, filter, limit) {
            let document = update.apply(store.get(&id)?)?;
            store.replace(&id, document)?;
            updated += 1;
        }

        debug!(collection, count = updated, "updated documents");
        Ok(updated)
    }

    fn apply_delete(&mut self, collection: &str, filter: Option<&Expr>, limit: Option<usize>) -> FakeDbResult<usize> {
        let Some(store) = self.collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut deleted = 0;
        for id in matching_ids(store, filter, limit) {
            store.delete(&id)?;
            deleted += 1;
        }

        debug!(collection, count = deleted, "deleted documents");
        Ok(deleted)
    }

    fn collection(&self, name: &str) -> FakeDbResult<&RecordStore> {
        self.collections
            .get(name)
            .ok_or_else(|| FakeDbError::ContainerNotFound(name.to_string()))
    }

    fn collection_for_insert(&mut self, name: &str) -> FakeDbResult<&mut RecordStore> {
        if !self.collections.contains_key(name) {
            if !self.auto_create {
                return Err(FakeDbError::ContainerNotFound(name.to_string()));
            }
            self.create_collection(name)?;
        }

        self.collections
            .get_mut(name)
            .ok_or_else(|| FakeDbError::ContainerNotFound(name.to_string()))
    }
}

fn matching_ids(store: &RecordStore, filter: Option<&Expr>, limit: Option<usize>) -> Vec<Bson> {
    store
        .scan(|document| matches(document, filter))
        .filter_map(|document| document.get(ID_FIELD).cloned())
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

// `_id` goes first, as in documents read back from a real server.
fn with_id(document: Document) -> Document {
    if matches!(document.get(ID_FIELD), Some(value) if value != &Bson::Null) {
        return document;
    }

    let mut identified = Document::new();
    identified.insert(ID_FIELD, generate_id());
    for (key, value) in document {
        if key != ID_FIELD {
            identified.insert(key, value);
        }
    }
    identified
}

fn project(document: &Record, paths: &[String]) -> FakeDbResult<Record> {
    let mut projected = Document::new();
    if let Some(id) = document.get(ID_FIELD) {
        projected.insert(ID_FIELD, id.clone());
    }

    for path in paths {
        if let Some(value) = get_path(document, path) {
            set_path(&mut projected, path, value.clone())?;
        }
    }

    Ok(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use fakedb_core::query::{Filter, SortDirection};

    #[test]
    fn events_scenario() {
        let mut db = FakeDocumentDb::new();
        let id = db
            .insert_one("events", doc! { "type": "click", "meta": { "x": 1, "y": 2 } })
            .unwrap();
        assert!(matches!(id, Bson::String(ref value) if !value.is_empty()));

        let meta_filter = Filter::eq("meta.x", 1);
        let found = db
            .find("events", Some(&meta_filter))
            .unwrap()
            .collect::<Vec<_>>();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get(ID_FIELD), Some(&id));
        assert_eq!(found[0].get_document("meta").unwrap(), &doc! { "x": 1, "y": 2 });

        assert_eq!(db.delete_many("events", Some(&Filter::eq("type", "click"))).unwrap(), 1);
        assert_eq!(db.count_documents("events", None).unwrap(), 0);
    }

    #[test]
    fn generated_ids_are_stable_and_first() {
        let mut db = FakeDocumentDb::new();
        let id = db.insert_one("events", doc! { "n": 1 }).unwrap();

        db.update_one("events", None, &Update::new().inc("n", 1)).unwrap();
        let stored = db.get("events", &id).unwrap();

        assert_eq!(stored.keys().next().map(String::as_str), Some(ID_FIELD));
        assert_eq!(stored.get_i32("n").unwrap(), 2);
    }

    #[test]
    fn explicit_id_collision() {
        let mut db = FakeDocumentDb::new();
        db.insert_one("users", doc! { "_id": "u1", "name": "Ana" }).unwrap();

        let err = db.insert_one("users", doc! { "_id": "u1", "name": "Bo" }).unwrap_err();
        assert!(matches!(err, FakeDbError::DuplicateKey(ref id, ref name) if id == "u1" && name == "users"));
        assert_eq!(db.count_documents("users", None).unwrap(), 1);
    }

    #[test]
    fn insert_many_checks_the_batch_first() {
        let mut db = FakeDocumentDb::new();
        db.insert_one("users", doc! { "_id": 1 }).unwrap();

        assert!(db.insert_many("users", vec![doc! { "_id": 2 }, doc! { "_id": 2 }]).is_err());
        assert!(db.insert_many("users", vec![doc! { "_id": 3 }, doc! { "_id": 1 }]).is_err());
        assert_eq!(db.count_documents("users", None).unwrap(), 1);

        let ids = db.insert_many("users", vec![doc! { "_id": 2 }, doc! { "x": 1 }]).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], Bson::Int32(2));
    }

    #[test]
    fn auto_create_toggle() {
        let mut db = FakeDocumentDb::new().with_auto_create(false);

        assert!(db.insert_one("events", doc! {}).unwrap_err().is_not_found());
        db.create_collection("events").unwrap();
        db.insert_one("events", doc! {}).unwrap();

        assert!(matches!(db.create_collection("events"), Err(FakeDbError::AlreadyExists(_))));
        assert_eq!(db.list_collections(), vec!["events"]);
    }

    #[test]
    fn missing_collection_behaviour() {
        let mut db = FakeDocumentDb::new();

        assert!(db.find("ghosts", None).err().is_some_and(|err| err.is_not_found()));
        assert_eq!(db.update_many("ghosts", None, &Update::new().set_field("a", 1)).unwrap(), 0);
        assert_eq!(db.delete_many("ghosts", None).unwrap(), 0);
        assert!(db.drop_collection("ghosts").unwrap_err().is_not_found());
    }

    #[test]
    fn update_one_and_many() {
        let mut db = FakeDocumentDb::new();
        for n in 0..3 {
            db.insert_one("jobs", doc! { "n": n, "state": "new" }).unwrap();
        }

        let done = Update::new().set_field("state", "done");
        assert_eq!(db.update_one("jobs", Some(&Filter::eq("state", "new")), &done).unwrap(), 1);
        assert_eq!(db.update_many("jobs", Some(&Filter::eq("state", "new")), &done).unwrap(), 2);
        assert_eq!(db.update_many("jobs", Some(&Filter::eq("state", "new")), &done).unwrap(), 0);
        assert_eq!(db.count_documents("jobs", Some(&Filter::eq("state", "done"))).unwrap(), 3);
    }

    #[test]
    fn updating_id_is_rejected() {
        let mut db = FakeDocumentDb::new();
        db.insert_one("users", doc! { "_id": "u1" }).unwrap();

        let err = db
            .update_many("users", None, &Update::new().set_field("_id", "u2"))
            .unwrap_err();
        assert!(matches!(err, FakeDbError::InvalidArgument(_)));
        assert!(db.get("users", &Bson::String("u1".into())).is_ok());
    }

    #[test]
    fn failing_update_keeps_earlier_documents_updated() {
        let mut db = FakeDocumentDb::new();
        db.insert_one("items", doc! { "_id": 1, "qty": 1 }).unwrap();
        db.insert_one("items", doc! { "_id": 2, "qty": "many" }).unwrap();
        db.insert_one("items", doc! { "_id": 3, "qty": 3 }).unwrap();

        let before = db.revision();
        assert!(db.update_many("items", None, &Update::new().inc("qty", 1)).is_err());
        assert_eq!(db.get("items", &Bson::Int32(1)).unwrap().get_i32("qty").unwrap(), 2);
        assert_eq!(db.get("items", &Bson::Int32(3)).unwrap().get_i32("qty").unwrap(), 3);
        assert_ne!(db.revision(), before);

        // Failing on the first match changes nothing.
        let before = db.revision();
        let filter = Filter::eq("_id", 2);
        assert!(db.update_many("items", Some(&filter), &Update::new().inc("qty", 1)).is_err());
        assert_eq!(db.revision(), before);
    }

    #[test]
    fn replace_one_keeps_id() {
        let mut db = FakeDocumentDb::new();
        db.insert_one("users", doc! { "_id": "u1", "name": "Ana", "age": 3 }).unwrap();

        assert_eq!(db.replace_one("users", None, doc! { "name": "Bo" }).unwrap(), 1);
        assert_eq!(
            db.get("users", &Bson::String("u1".into())).unwrap(),
            &doc! { "_id": "u1", "name": "Bo" }
        );
        assert!(db.replace_one("users", None, doc! { "_id": "u2" }).is_err());
        assert_eq!(db.replace_one("users", Some(&Filter::eq("name", "Cy")), doc! {}).unwrap(), 0);
    }

    #[test]
    fn delete_one_removes_first_match() {
        let mut db = FakeDocumentDb::new();
        for n in 0..3 {
            db.insert_one("jobs", doc! { "_id": n, "kind": "a" }).unwrap();
        }

        assert_eq!(db.delete_one("jobs", Some(&Filter::eq("kind", "a"))).unwrap(), 1);
        assert!(db.get("jobs", &Bson::Int32(0)).unwrap_err().is_not_found());
        assert_eq!(db.count_documents("jobs", None).unwrap(), 2);
    }

    #[test]
    fn find_one_and_queries() {
        let mut db = FakeDocumentDb::new();
        for (n, kind) in [(3, "b"), (1, "a"), (2, "a")] {
            db.insert_one("jobs", doc! { "_id": n, "kind": kind, "meta": { "w": n * 10, "z": 0 } })
                .unwrap();
        }

        let first = db.find_one("jobs", Some(&Filter::eq("kind", "a"))).unwrap();
        assert_eq!(first.and_then(|doc| doc.get("_id")), Some(&Bson::Int32(1)));
        assert!(db.find_one("jobs", Some(&Filter::eq("kind", "z"))).unwrap().is_none());

        let query = Query::builder()
            .filter(Filter::eq("kind", "a"))
            .sort("meta.w", SortDirection::Desc)
            .columns(["meta.w"])
            .build();
        assert_eq!(
            db.find_query("jobs", &query).unwrap(),
            vec![doc! { "_id": 2, "meta": { "w": 20 } }, doc! { "_id": 1, "meta": { "w": 10 } }]
        );
    }
}
