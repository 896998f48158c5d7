//! `async` entry points.
//!
//! Lock waits and snapshot I/O block, so every operation runs the synchronous
//! logic on tokio's blocking pool and the calling task only awaits its result.
//! Handles are cheap to clone and can be moved into spawned tasks.
//!
//! ```ignore
//! let db = DocumentDb::in_memory().into_async();
//! let id = db.insert_one("events", doc! { "type": "click" }).await?;
//! let clicks = db.find("events", Some(Filter::eq("type", "click"))).await?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document};
use tokio::task;

use fakedb_core::{
    backend::StorageBackend,
    error::{FakeDbError, FakeDbResult},
    query::{Expr, Query},
    record::Record,
    schema::TableSchema,
    update::Update,
};
use fakedb_memory::{FakeDocumentDb, FakeRelationalDb};

use crate::{document::DocumentDb, relational::RelationalDb};

async fn run_blocking<T, R, F>(inner: &Arc<T>, op: F) -> FakeDbResult<R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
    F: FnOnce(&T) -> FakeDbResult<R> + Send + 'static,
{
    let inner = Arc::clone(inner);
    task::spawn_blocking(move || op(&inner))
        .await
        .map_err(|err| FakeDbError::Backend(format!("blocking task failed: {err}")))?
}

/// A [`RelationalDb`] with `async` operations.
#[derive(Debug)]
pub struct AsyncRelationalDb<B: StorageBackend<FakeRelationalDb> + 'static> {
    inner: Arc<RelationalDb<B>>,
}

impl<B: StorageBackend<FakeRelationalDb> + 'static> Clone for AsyncRelationalDb<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: StorageBackend<FakeRelationalDb> + 'static> AsyncRelationalDb<B> {
    pub fn new(db: RelationalDb<B>) -> Self {
        Self { inner: Arc::new(db) }
    }

    /// The synchronous handle this one wraps.
    pub fn blocking(&self) -> &RelationalDb<B> {
        &self.inner
    }

    pub async fn create_table(&self, name: &str, schema: TableSchema) -> FakeDbResult<()> {
        let name = name.to_string();
        run_blocking(&self.inner, move |db| db.create_table(&name, schema)).await
    }

    pub async fn create_table_if_not_exists(&self, name: &str, schema: TableSchema) -> FakeDbResult<bool> {
        let name = name.to_string();
        run_blocking(&self.inner, move |db| db.create_table_if_not_exists(&name, schema)).await
    }

    pub async fn drop_table(&self, name: &str) -> FakeDbResult<()> {
        let name = name.to_string();
        run_blocking(&self.inner, move |db| db.drop_table(&name)).await
    }

    pub async fn list_tables(&self) -> FakeDbResult<Vec<String>> {
        run_blocking(&self.inner, |db| db.list_tables()).await
    }

    pub async fn insert(&self, table: &str, row: Document) -> FakeDbResult<Bson> {
        let table = table.to_string();
        run_blocking(&self.inner, move |db| db.insert(&table, row)).await
    }

    pub async fn insert_many(&self, table: &str, rows: Vec<Document>) -> FakeDbResult<Vec<Bson>> {
        let table = table.to_string();
        run_blocking(&self.inner, move |db| db.insert_many(&table, rows)).await
    }

    pub async fn get(&self, table: &str, id: impl Into<Bson>) -> FakeDbResult<Record> {
        let (table, id) = (table.to_string(), id.into());
        run_blocking(&self.inner, move |db| db.get(&table, id)).await
    }

    pub async fn select(
        &self,
        table: &str,
        filter: Option<Expr>,
        columns: Option<Vec<String>>,
    ) -> FakeDbResult<Vec<Record>> {
        let table = table.to_string();
        run_blocking(&self.inner, move |db| {
            db.select(&table, filter.as_ref(), columns.as_deref())
        })
        .await
    }

    pub async fn query(&self, table: &str, query: Query) -> FakeDbResult<Vec<Record>> {
        let table = table.to_string();
        run_blocking(&self.inner, move |db| db.query(&table, &query)).await
    }

    pub async fn count(&self, table: &str, filter: Option<Expr>) -> FakeDbResult<usize> {
        let table = table.to_string();
        run_blocking(&self.inner, move |db| db.count(&table, filter.as_ref())).await
    }

    pub async fn update(&self, table: &str, filter: Option<Expr>, values: Document) -> FakeDbResult<usize> {
        let table = table.to_string();
        run_blocking(&self.inner, move |db| db.update(&table, filter.as_ref(), &values)).await
    }

    pub async fn delete(&self, table: &str, filter: Option<Expr>) -> FakeDbResult<usize> {
        let table = table.to_string();
        run_blocking(&self.inner, move |db| db.delete(&table, filter.as_ref())).await
    }

    pub async fn join(
        &self,
        table_a: &str,
        table_b: &str,
        key_a: &str,
        key_b: &str,
        filter: Option<Expr>,
    ) -> FakeDbResult<Vec<Record>> {
        let (table_a, table_b) = (table_a.to_string(), table_b.to_string());
        let (key_a, key_b) = (key_a.to_string(), key_b.to_string());
        run_blocking(&self.inner, move |db| {
            db.join(&table_a, &table_b, &key_a, &key_b, filter.as_ref())
        })
        .await
    }

    pub async fn reset(&self) -> FakeDbResult<()> {
        run_blocking(&self.inner, |db| db.reset()).await
    }
}

/// A [`DocumentDb`] with `async` operations.
#[derive(Debug)]
pub struct AsyncDocumentDb<B: StorageBackend<FakeDocumentDb> + 'static> {
    inner: Arc<DocumentDb<B>>,
}

impl<B: StorageBackend<FakeDocumentDb> + 'static> Clone for AsyncDocumentDb<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: StorageBackend<FakeDocumentDb> + 'static> AsyncDocumentDb<B> {
    pub fn new(db: DocumentDb<B>) -> Self {
        Self { inner: Arc::new(db) }
    }

    /// The synchronous handle this one wraps.
    pub fn blocking(&self) -> &DocumentDb<B> {
        &self.inner
    }

    pub async fn create_collection(&self, name: &str) -> FakeDbResult<()> {
        let name = name.to_string();
        run_blocking(&self.inner, move |db| db.create_collection(&name)).await
    }

    pub async fn drop_collection(&self, name: &str) -> FakeDbResult<()> {
        let name = name.to_string();
        run_blocking(&self.inner, move |db| db.drop_collection(&name)).await
    }

    pub async fn list_collections(&self) -> FakeDbResult<Vec<String>> {
        run_blocking(&self.inner, |db| db.list_collections()).await
    }

    pub async fn insert_one(&self, collection: &str, document: Document) -> FakeDbResult<Bson> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.insert_one(&collection, document)).await
    }

    pub async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> FakeDbResult<Vec<Bson>> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.insert_many(&collection, documents)).await
    }

    pub async fn find(&self, collection: &str, filter: Option<Expr>) -> FakeDbResult<Vec<Record>> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.find(&collection, filter.as_ref())).await
    }

    pub async fn find_one(&self, collection: &str, filter: Option<Expr>) -> FakeDbResult<Option<Record>> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.find_one(&collection, filter.as_ref())).await
    }

    pub async fn query(&self, collection: &str, query: Query) -> FakeDbResult<Vec<Record>> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.query(&collection, &query)).await
    }

    pub async fn count_documents(&self, collection: &str, filter: Option<Expr>) -> FakeDbResult<usize> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.count_documents(&collection, filter.as_ref())).await
    }

    pub async fn get(&self, collection: &str, id: impl Into<Bson>) -> FakeDbResult<Record> {
        let (collection, id) = (collection.to_string(), id.into());
        run_blocking(&self.inner, move |db| db.get(&collection, id)).await
    }

    pub async fn update_one(&self, collection: &str, filter: Option<Expr>, update: Update) -> FakeDbResult<usize> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.update_one(&collection, filter.as_ref(), &update)).await
    }

    pub async fn update_many(&self, collection: &str, filter: Option<Expr>, update: Update) -> FakeDbResult<usize> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.update_many(&collection, filter.as_ref(), &update)).await
    }

    pub async fn replace_one(
        &self,
        collection: &str,
        filter: Option<Expr>,
        replacement: Document,
    ) -> FakeDbResult<usize> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| {
            db.replace_one(&collection, filter.as_ref(), replacement)
        })
        .await
    }

    pub async fn delete_one(&self, collection: &str, filter: Option<Expr>) -> FakeDbResult<usize> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.delete_one(&collection, filter.as_ref())).await
    }

    pub async fn delete_many(&self, collection: &str, filter: Option<Expr>) -> FakeDbResult<usize> {
        let collection = collection.to_string();
        run_blocking(&self.inner, move |db| db.delete_many(&collection, filter.as_ref())).await
    }

    pub async fn reset(&self) -> FakeDbResult<()> {
        run_blocking(&self.inner, |db| db.reset()).await
    }
}
