//! Document database handle over a storage backend.
//!
//! # Example
//!
//! ```ignore
//! use fakedb::{prelude::*, document::DocumentDb};
//! use bson::doc;
//!
//! let db = DocumentDb::in_memory();
//! let events = db.collection("events");
//! events.insert_one(doc! { "type": "click", "meta": { "x": 1 } })?;
//!
//! let clicks = events.find(Some(&Filter::eq("meta.x", 1)))?;
//! ```

use bson::{Bson, Document};

use fakedb_core::{
    backend::{Persist, StorageBackend},
    error::FakeDbResult,
    model::{Model, ModelExt},
    query::{Expr, Query},
    record::Record,
    update::Update,
};
use fakedb_memory::{FakeDocumentDb, MemoryStorage};

use crate::asynchronous::AsyncDocumentDb;

/// A fake document database bound to a storage backend.
#[derive(Debug, Clone)]
pub struct DocumentDb<B: StorageBackend<FakeDocumentDb>> {
    backend: B,
    auto_create: bool,
}

impl DocumentDb<MemoryStorage<FakeDocumentDb>> {
    /// A database that lives only as long as this handle and its clones.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }
}

impl<B: StorageBackend<FakeDocumentDb>> DocumentDb<B> {
    /// Wraps `backend`; inserting into a missing collection creates it.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            auto_create: true,
        }
    }

    /// Whether inserting into a missing collection creates it.
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn auto_create(&self) -> bool {
        self.auto_create
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets a handle scoped to one collection.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection {
            name: name.to_string(),
            db: self,
        }
    }

    /// Converts this handle into one with `async` operations.
    pub fn into_async(self) -> AsyncDocumentDb<B>
    where
        B: 'static,
    {
        AsyncDocumentDb::new(self)
    }

    fn read<R>(&self, op: impl FnOnce(&FakeDocumentDb) -> FakeDbResult<R>) -> FakeDbResult<R> {
        self.backend.with_read(op)
    }

    fn write<R>(
        &self,
        op: impl FnOnce(&mut FakeDocumentDb) -> FakeDbResult<R>,
        changed: impl FnOnce(&R) -> bool,
    ) -> FakeDbResult<R> {
        self.backend.with_lock(|db| {
            // The toggle is a per-handle setting and is not persisted.
            db.set_auto_create(self.auto_create);
            let revision = db.revision();
            match op(db) {
                Ok(result) => {
                    let persist = Persist::when(changed(&result));
                    Ok((Ok(result), persist))
                }
                // Documents changed before a batch failed stay changed.
                Err(err) => Ok((Err(err), Persist::when(db.revision() != revision))),
            }
        })?
    }

    pub fn create_collection(&self, name: &str) -> FakeDbResult<()> {
        self.write(|db| db.create_collection(name), |_| true)
    }

    pub fn drop_collection(&self, name: &str) -> FakeDbResult<()> {
        self.write(|db| db.drop_collection(name), |_| true)
    }

    pub fn list_collections(&self) -> FakeDbResult<Vec<String>> {
        self.read(|db| Ok(db.list_collections().into_iter().map(str::to_string).collect()))
    }

    pub fn has_collection(&self, name: &str) -> FakeDbResult<bool> {
        self.read(|db| Ok(db.has_collection(name)))
    }

    /// Inserts a document and returns its `_id`, generated when absent.
    pub fn insert_one(&self, collection: &str, document: Document) -> FakeDbResult<Bson> {
        self.write(|db| db.insert_one(collection, document), |_| true)
    }

    /// Inserts every document or none.
    pub fn insert_many(&self, collection: &str, documents: Vec<Document>) -> FakeDbResult<Vec<Bson>> {
        self.write(|db| db.insert_many(collection, documents), |ids| !ids.is_empty())
    }

    /// Documents matching `filter`, in insertion order.
    pub fn find(&self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<Vec<Record>> {
        self.read(|db| Ok(db.find(collection, filter)?.cloned().collect()))
    }

    pub fn find_one(&self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<Option<Record>> {
        self.read(|db| Ok(db.find_one(collection, filter)?.cloned()))
    }

    pub fn query(&self, collection: &str, query: &Query) -> FakeDbResult<Vec<Record>> {
        self.read(|db| db.find_query(collection, query))
    }

    pub fn count_documents(&self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.read(|db| db.count_documents(collection, filter))
    }

    pub fn get(&self, collection: &str, id: impl Into<Bson>) -> FakeDbResult<Record> {
        let id = id.into();
        self.read(|db| db.get(collection, &id).cloned())
    }

    pub fn update_one(&self, collection: &str, filter: Option<&Expr>, update: &Update) -> FakeDbResult<usize> {
        self.write(|db| db.update_one(collection, filter, update), |updated| *updated > 0)
    }

    /// Applies `update` to every matching document.
    ///
    /// A failure stops the call; documents updated before it keep their changes.
    pub fn update_many(&self, collection: &str, filter: Option<&Expr>, update: &Update) -> FakeDbResult<usize> {
        self.write(|db| db.update_many(collection, filter, update), |updated| *updated > 0)
    }

    pub fn replace_one(
        &self,
        collection: &str,
        filter: Option<&Expr>,
        replacement: Document,
    ) -> FakeDbResult<usize> {
        self.write(|db| db.replace_one(collection, filter, replacement), |replaced| *replaced > 0)
    }

    pub fn delete_one(&self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.write(|db| db.delete_one(collection, filter), |deleted| *deleted > 0)
    }

    pub fn delete_many(&self, collection: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.write(|db| db.delete_many(collection, filter), |deleted| *deleted > 0)
    }

    /// Inserts a typed model into its collection.
    pub fn insert_model<M: Model>(&self, model: &M) -> FakeDbResult<Bson> {
        self.collection(M::container_name()).insert_model(model)
    }

    /// Finds typed models in their collection.
    pub fn find_models<M: Model>(&self, filter: Option<&Expr>) -> FakeDbResult<Vec<M>> {
        self.collection(M::container_name()).find_models(filter)
    }

    /// A copy of the whole current state.
    pub fn snapshot(&self) -> FakeDbResult<FakeDocumentDb> {
        self.backend.load()
    }

    /// Drops every collection and discards the persisted state.
    pub fn reset(&self) -> FakeDbResult<()> {
        self.backend.reset()
    }
}

/// A handle to one collection of a [`DocumentDb`].
#[derive(Debug)]
pub struct Collection<'a, B: StorageBackend<FakeDocumentDb>> {
    name: String,
    db: &'a DocumentDb<B>,
}

impl<'a, B: StorageBackend<FakeDocumentDb>> Collection<'a, B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> FakeDbResult<bool> {
        self.db.has_collection(&self.name)
    }

    pub fn insert_one(&self, document: Document) -> FakeDbResult<Bson> {
        self.db.insert_one(&self.name, document)
    }

    pub fn insert_many(&self, documents: Vec<Document>) -> FakeDbResult<Vec<Bson>> {
        self.db.insert_many(&self.name, documents)
    }

    pub fn find(&self, filter: Option<&Expr>) -> FakeDbResult<Vec<Record>> {
        self.db.find(&self.name, filter)
    }

    pub fn find_one(&self, filter: Option<&Expr>) -> FakeDbResult<Option<Record>> {
        self.db.find_one(&self.name, filter)
    }

    pub fn query(&self, query: &Query) -> FakeDbResult<Vec<Record>> {
        self.db.query(&self.name, query)
    }

    pub fn count(&self, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.db.count_documents(&self.name, filter)
    }

    pub fn get(&self, id: impl Into<Bson>) -> FakeDbResult<Record> {
        self.db.get(&self.name, id)
    }

    pub fn update_one(&self, filter: Option<&Expr>, update: &Update) -> FakeDbResult<usize> {
        self.db.update_one(&self.name, filter, update)
    }

    pub fn update_many(&self, filter: Option<&Expr>, update: &Update) -> FakeDbResult<usize> {
        self.db.update_many(&self.name, filter, update)
    }

    pub fn replace_one(&self, filter: Option<&Expr>, replacement: Document) -> FakeDbResult<usize> {
        self.db.replace_one(&self.name, filter, replacement)
    }

    pub fn delete_one(&self, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.db.delete_one(&self.name, filter)
    }

    pub fn delete_many(&self, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.db.delete_many(&self.name, filter)
    }

    pub fn drop(&self) -> FakeDbResult<()> {
        self.db.drop_collection(&self.name)
    }

    pub fn insert_model<M: Model>(&self, model: &M) -> FakeDbResult<Bson> {
        self.insert_one(model.to_record()?)
    }

    /// Finds matching documents and converts them into `M`.
    pub fn find_models<M: Model>(&self, filter: Option<&Expr>) -> FakeDbResult<Vec<M>> {
        self.find(filter)?.into_iter().map(M::from_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use fakedb_core::{error::FakeDbError, query::Filter};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Event {
        #[serde(rename = "type")]
        kind: String,
        count: i32,
    }

    impl Model for Event {
        fn container_name() -> &'static str {
            "events"
        }
    }

    #[test]
    fn auto_create_is_applied_per_handle() {
        let strict = DocumentDb::in_memory().with_auto_create(false);
        let err = strict.insert_one("events", doc! { "n": 1 }).unwrap_err();
        assert!(matches!(err, FakeDbError::ContainerNotFound(ref name) if name == "events"));

        strict.create_collection("events").unwrap();
        strict.insert_one("events", doc! { "n": 1 }).unwrap();
        assert_eq!(strict.collection("events").count(None).unwrap(), 1);
    }

    #[test]
    fn failed_update_many_keeps_earlier_changes() {
        let db = DocumentDb::in_memory();
        let events = db.collection("events");
        events
            .insert_many(vec![doc! { "n": 1 }, doc! { "n": "text" }, doc! { "n": 3 }])
            .unwrap();

        let err = events.update_many(None, &Update::new().inc("n", 1)).unwrap_err();
        assert!(matches!(err, FakeDbError::InvalidArgument(_)));
        assert_eq!(events.count(Some(&Filter::eq("n", 2))).unwrap(), 1);
        assert_eq!(events.count(Some(&Filter::eq("n", 3))).unwrap(), 1);
        assert_eq!(events.count(Some(&Filter::eq("n", 1))).unwrap(), 0);
    }

    #[test]
    fn typed_models_ignore_the_generated_id() {
        let db = DocumentDb::in_memory();
        let event = Event { kind: "click".into(), count: 2 };

        let id = db.insert_model(&event).unwrap();
        assert!(matches!(id, Bson::String(_)));
        assert_eq!(db.find_models::<Event>(Some(&Filter::eq("type", "click"))).unwrap(), vec![event]);
    }

    #[test]
    fn missing_collection_reads_and_writes() {
        let db = DocumentDb::in_memory();
        assert!(db.find("missing", None).unwrap_err().is_not_found());
        assert_eq!(db.delete_many("missing", None).unwrap(), 0);
        assert_eq!(db.update_many("missing", None, &Update::new().set_field("a", 1)).unwrap(), 0);
    }
}
