//! Relational database handle over a storage backend.
//!
//! Every call is one lock-guarded read-modify-write against the backend, so
//! handles opened on the same snapshot from different threads or processes see
//! each other's committed changes.
//!
//! # Example
//!
//! ```ignore
//! use fakedb::{prelude::*, relational::RelationalDb};
//! use bson::doc;
//!
//! let db = RelationalDb::in_memory();
//! db.create_table("users", TableSchema::from_pairs([("id", "int"), ("name", "str")])?)?;
//!
//! let users = db.table("users");
//! users.insert(doc! { "name": "Ana" })?;
//! assert_eq!(users.count(Some(&Filter::eq("name", "Ana")))?, 1);
//! ```

use bson::{Bson, Document};

use fakedb_core::{
    backend::{Persist, StorageBackend},
    error::FakeDbResult,
    model::{Model, ModelExt},
    query::{Expr, Query},
    record::Record,
    schema::TableSchema,
};
use fakedb_memory::{FakeRelationalDb, MemoryStorage};

use crate::asynchronous::AsyncRelationalDb;

/// A fake relational database bound to a storage backend.
#[derive(Debug, Clone)]
pub struct RelationalDb<B: StorageBackend<FakeRelationalDb>> {
    backend: B,
}

impl RelationalDb<MemoryStorage<FakeRelationalDb>> {
    /// A database that lives only as long as this handle and its clones.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }
}

impl<B: StorageBackend<FakeRelationalDb>> RelationalDb<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets a handle scoped to one table.
    pub fn table<'a>(&'a self, name: &str) -> Table<'a, B> {
        Table {
            name: name.to_string(),
            db: self,
        }
    }

    /// Converts this handle into one with `async` operations.
    pub fn into_async(self) -> AsyncRelationalDb<B>
    where
        B: 'static,
    {
        AsyncRelationalDb::new(self)
    }

    fn read<R>(&self, op: impl FnOnce(&FakeRelationalDb) -> FakeDbResult<R>) -> FakeDbResult<R> {
        self.backend.with_read(op)
    }

    fn write<R>(
        &self,
        op: impl FnOnce(&mut FakeRelationalDb) -> FakeDbResult<R>,
        changed: impl FnOnce(&R) -> bool,
    ) -> FakeDbResult<R> {
        self.backend.with_lock(|db| {
            let revision = db.revision();
            match op(db) {
                Ok(result) => {
                    let persist = Persist::when(changed(&result));
                    Ok((Ok(result), persist))
                }
                // Rows changed before a batch failed stay changed.
                Err(err) => Ok((Err(err), Persist::when(db.revision() != revision))),
            }
        })?
    }

    pub fn create_table(&self, name: &str, schema: TableSchema) -> FakeDbResult<()> {
        self.write(|db| db.create_table(name, schema), |_| true)
    }

    /// Creates the table unless it exists; returns `true` if it was created.
    pub fn create_table_if_not_exists(&self, name: &str, schema: TableSchema) -> FakeDbResult<bool> {
        self.write(|db| db.create_table_if_not_exists(name, schema), |created| *created)
    }

    pub fn drop_table(&self, name: &str) -> FakeDbResult<()> {
        self.write(|db| db.drop_table(name), |_| true)
    }

    pub fn list_tables(&self) -> FakeDbResult<Vec<String>> {
        self.read(|db| Ok(db.list_tables().into_iter().map(str::to_string).collect()))
    }

    pub fn has_table(&self, name: &str) -> FakeDbResult<bool> {
        self.read(|db| Ok(db.has_table(name)))
    }

    pub fn schema(&self, table: &str) -> FakeDbResult<TableSchema> {
        self.read(|db| db.schema(table).cloned())
    }

    /// Inserts a row and returns its primary key.
    pub fn insert(&self, table: &str, row: Document) -> FakeDbResult<Bson> {
        self.write(|db| db.insert(table, row), |_| true)
    }

    /// Inserts every row or none.
    pub fn insert_many(&self, table: &str, rows: Vec<Document>) -> FakeDbResult<Vec<Bson>> {
        self.write(|db| db.insert_many(table, rows), |ids| !ids.is_empty())
    }

    pub fn get(&self, table: &str, id: impl Into<Bson>) -> FakeDbResult<Record> {
        let id = id.into();
        self.read(|db| db.get(table, &id).cloned())
    }

    pub fn select(
        &self,
        table: &str,
        filter: Option<&Expr>,
        columns: Option<&[String]>,
    ) -> FakeDbResult<Vec<Record>> {
        self.read(|db| db.select(table, filter, columns))
    }

    pub fn query(&self, table: &str, query: &Query) -> FakeDbResult<Vec<Record>> {
        self.read(|db| db.select_query(table, query))
    }

    pub fn count(&self, table: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.read(|db| db.count(table, filter))
    }

    /// Sets `values` on every matching row and returns how many were updated.
    ///
    /// A failure (a primary-key collision) stops the call; rows updated before
    /// it keep their changes.
    pub fn update(&self, table: &str, filter: Option<&Expr>, values: &Document) -> FakeDbResult<usize> {
        self.write(|db| db.update(table, filter, values), |updated| *updated > 0)
    }

    pub fn delete(&self, table: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.write(|db| db.delete(table, filter), |deleted| *deleted > 0)
    }

    pub fn truncate(&self, table: &str) -> FakeDbResult<usize> {
        self.write(|db| db.truncate(table), |removed| *removed > 0)
    }

    /// Rows of `table_a` paired with rows of `table_b` where `key_a == key_b`,
    /// nested as `{ <table_a>: .., <table_b>: .. }`.
    pub fn join(
        &self,
        table_a: &str,
        table_b: &str,
        key_a: &str,
        key_b: &str,
        filter: Option<&Expr>,
    ) -> FakeDbResult<Vec<Record>> {
        self.read(|db| db.join(table_a, table_b, key_a, key_b, filter))
    }

    /// Inserts a typed model into its table.
    pub fn insert_model<M: Model>(&self, model: &M) -> FakeDbResult<Bson> {
        self.table(M::container_name()).insert_model(model)
    }

    /// Selects typed models from their table.
    pub fn select_models<M: Model>(&self, filter: Option<&Expr>) -> FakeDbResult<Vec<M>> {
        self.table(M::container_name()).select_models(filter)
    }

    /// A copy of the whole current state.
    pub fn snapshot(&self) -> FakeDbResult<FakeRelationalDb> {
        self.backend.load()
    }

    /// Drops every table and discards the persisted state.
    pub fn reset(&self) -> FakeDbResult<()> {
        self.backend.reset()
    }
}

/// A handle to one table of a [`RelationalDb`].
#[derive(Debug)]
pub struct Table<'a, B: StorageBackend<FakeRelationalDb>> {
    name: String,
    db: &'a RelationalDb<B>,
}

impl<'a, B: StorageBackend<FakeRelationalDb>> Table<'a, B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> FakeDbResult<bool> {
        self.db.has_table(&self.name)
    }

    pub fn schema(&self) -> FakeDbResult<TableSchema> {
        self.db.schema(&self.name)
    }

    pub fn insert(&self, row: Document) -> FakeDbResult<Bson> {
        self.db.insert(&self.name, row)
    }

    pub fn insert_many(&self, rows: Vec<Document>) -> FakeDbResult<Vec<Bson>> {
        self.db.insert_many(&self.name, rows)
    }

    pub fn get(&self, id: impl Into<Bson>) -> FakeDbResult<Record> {
        self.db.get(&self.name, id)
    }

    pub fn select(&self, filter: Option<&Expr>) -> FakeDbResult<Vec<Record>> {
        self.db.select(&self.name, filter, None)
    }

    pub fn query(&self, query: &Query) -> FakeDbResult<Vec<Record>> {
        self.db.query(&self.name, query)
    }

    pub fn count(&self, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.db.count(&self.name, filter)
    }

    pub fn update(&self, filter: Option<&Expr>, values: &Document) -> FakeDbResult<usize> {
        self.db.update(&self.name, filter, values)
    }

    pub fn delete(&self, filter: Option<&Expr>) -> FakeDbResult<usize> {
        self.db.delete(&self.name, filter)
    }

    pub fn truncate(&self) -> FakeDbResult<usize> {
        self.db.truncate(&self.name)
    }

    pub fn insert_model<M: Model>(&self, model: &M) -> FakeDbResult<Bson> {
        self.insert(model.to_record()?)
    }

    /// Selects matching rows and converts them into `M`.
    pub fn select_models<M: Model>(&self, filter: Option<&Expr>) -> FakeDbResult<Vec<M>> {
        self.select(filter)?.into_iter().map(M::from_record).collect()
    }
}
