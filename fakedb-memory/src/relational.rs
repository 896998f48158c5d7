//! The fake relational database: named tables with declared schemas.

use std::collections::{BTreeMap, HashSet};

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fakedb_core::{
    error::{FakeDbError, FakeDbResult},
    query::{Expr, FieldOp, Query, QueryVisitor},
    record::Record,
    schema::{ColumnType, TableSchema},
    snapshot::Snapshot,
};

use crate::{
    evaluator::{apply_window, matches, values_equal},
    record_store::RecordStore,
};

/// A table: its schema, its rows and the last integer key handed out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    rows: RecordStore,
    last_id: i64,
}

impl Table {
    fn new(name: &str, schema: TableSchema) -> Self {
        let rows = RecordStore::new(name, schema.primary_key());
        Self { schema, rows, last_id: 0 }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &RecordStore {
        &self.rows
    }

    fn name(&self) -> &str {
        self.rows.name()
    }

    /// Validates a row, fills missing columns and assigns an integer key if needed.
    fn prepare_row(&self, row: &Document, last_id: &mut i64) -> FakeDbResult<Record> {
        let mut row = self.schema.normalize_row(self.name(), row)?;
        let primary_key = self.schema.primary_key();

        if let Some(id) = row.get(primary_key).and_then(int_value) {
            *last_id = (*last_id).max(id);
            return Ok(row);
        }
        if !matches!(row.get(primary_key), None | Some(Bson::Null)) {
            return Ok(row);
        }

        if self.schema.primary_key_type() != ColumnType::Int {
            return Err(FakeDbError::Schema(
                self.name().to_string(),
                format!("primary key '{primary_key}' is required"),
            ));
        }

        *last_id = last_id.checked_add(1).ok_or_else(|| {
            FakeDbError::Schema(
                self.name().to_string(),
                format!("integer key space of '{primary_key}' is exhausted"),
            )
        })?;
        row.insert(primary_key, Bson::Int64(*last_id));

        Ok(row)
    }

    fn check_filter(&self, filter: Option<&Expr>) -> FakeDbResult<()> {
        match filter {
            Some(expr) => ColumnChecker { schema: &self.schema, table: self.name() }.visit_expr(expr),
            None => Ok(()),
        }
    }

    fn require_column(&self, column: &str) -> FakeDbResult<()> {
        match self.schema.column(column) {
            Some(_) => Ok(()),
            None => Err(FakeDbError::Schema(
                self.name().to_string(),
                format!("unknown column '{column}'"),
            )),
        }
    }

    fn matching_ids(&self, filter: Option<&Expr>) -> Vec<Bson> {
        let primary_key = self.schema.primary_key();

        self.rows
            .scan(|row| matches(row, filter))
            .filter_map(|row| row.get(primary_key).cloned())
            .collect()
    }
}

fn int_value(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        _ => None,
    }
}

fn project(row: &Record, columns: Option<&[String]>) -> Record {
    match columns {
        Some(columns) => columns
            .iter()
            .map(|column| (column.clone(), row.get(column).cloned().unwrap_or(Bson::Null)))
            .collect(),
        None => row.clone(),
    }
}

/// Rejects predicates over undeclared columns.
struct ColumnChecker<'a> {
    schema: &'a TableSchema,
    table: &'a str,
}

impl ColumnChecker<'_> {
    fn check(&self, field: &str) -> FakeDbResult<()> {
        let column = field.split('.').next().unwrap_or(field);

        match self.schema.column(column) {
            Some(_) => Ok(()),
            None => Err(FakeDbError::Schema(
                self.table.to_string(),
                format!("unknown column '{column}' in filter"),
            )),
        }
    }
}

impl QueryVisitor for ColumnChecker<'_> {
    type Output = ();
    type Error = FakeDbError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        exprs.iter().try_for_each(|expr| self.visit_expr(expr))
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        exprs.iter().try_for_each(|expr| self.visit_expr(expr))
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        self.visit_expr(expr)
    }

    fn visit_exists(&mut self, field: &str, _should_exist: bool) -> Result<Self::Output, Self::Error> {
        self.check(field)
    }

    fn visit_field(&mut self, field: &str, _op: &FieldOp, _value: &Bson) -> Result<Self::Output, Self::Error> {
        self.check(field)
    }
}

/// An in-memory relational database.
///
/// Tables are created explicitly with a [`TableSchema`]; every insert and update
/// is validated against it. Rows are returned in insertion order unless a query
/// asks for a sort.
///
/// # Example
///
/// ```ignore
/// use fakedb_memory::FakeRelationalDb;
/// use fakedb_core::{query::Filter, schema::TableSchema};
/// use bson::doc;
///
/// let mut db = FakeRelationalDb::new();
/// db.create_table("users", TableSchema::from_pairs([("id", "int"), ("name", "str")])?)?;
/// db.insert("users", doc! { "id": 1, "name": "Ana" })?;
///
/// let rows = db.select("users", Some(&Filter::eq("name", "Ana")), None)?;
/// assert_eq!(rows.len(), 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakeRelationalDb {
    tables: BTreeMap<String, Table>,
}

impl Snapshot for FakeRelationalDb {
    const KIND: &'static str = "relational";
}

impl FakeRelationalDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table. Fails with [`FakeDbError::AlreadyExists`] if the name is taken.
    pub fn create_table(&mut self, name: &str, schema: TableSchema) -> FakeDbResult<()> {
        if name.is_empty() {
            return Err(FakeDbError::InvalidArgument("table names must be non-empty".into()));
        }
        if self.tables.contains_key(name) {
            return Err(FakeDbError::AlreadyExists(name.to_string()));
        }

        debug!(table = name, columns = schema.columns().len(), "creating table");
        self.tables.insert(name.to_string(), Table::new(name, schema));

        Ok(())
    }

    /// Creates the table unless it exists; returns whether it was created.
    ///
    /// An existing table keeps its original schema.
    pub fn create_table_if_not_exists(&mut self, name: &str, schema: TableSchema) -> FakeDbResult<bool> {
        if self.tables.contains_key(name) {
            return Ok(false);
        }

        self.create_table(name, schema).map(|_| true)
    }

    pub fn drop_table(&mut self, name: &str) -> FakeDbResult<()> {
        match self.tables.remove(name) {
            Some(_) => {
                debug!(table = name, "dropped table");
                Ok(())
            }
            None => Err(FakeDbError::ContainerNotFound(name.to_string())),
        }
    }

    /// Table names in lexical order.
    pub fn list_tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Advances whenever a row changes.
    ///
    /// Comparing two readings tells whether a call that failed part-way had
    /// already modified rows.
    pub fn revision(&self) -> u64 {
        self.tables
            .values()
            .fold(0, |total, table| total.wrapping_add(table.rows.revision()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn schema(&self, table: &str) -> FakeDbResult<&TableSchema> {
        self.table(table).map(Table::schema)
    }

    /// Inserts a row and returns its primary-key value.
    ///
    /// Missing declared columns are stored as null. An integer primary key that
    /// is absent or null is assigned the next value after the largest key seen.
    pub fn insert(&mut self, table: &str, row: Document) -> FakeDbResult<Bson> {
        let entry = self.table_mut(table)?;
        let mut last_id = entry.last_id;

        let row = entry.prepare_row(&row, &mut last_id)?;
        let id = row.get(entry.schema.primary_key()).cloned().unwrap_or(Bson::Null);

        entry.rows.insert(row)?;
        entry.last_id = last_id;

        Ok(id)
    }

    /// Inserts every row or none: the whole batch is validated before the first insert.
    pub fn insert_many(&mut self, table: &str, rows: impl IntoIterator<Item = Document>) -> FakeDbResult<Vec<Bson>> {
        let entry = self.table_mut(table)?;
        let mut last_id = entry.last_id;
        let mut seen = HashSet::new();
        let mut prepared = Vec::new();

        for row in rows {
            let row = entry.prepare_row(&row, &mut last_id)?;
            let key = entry.rows.key_of(&row)?;

            if entry.rows.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(FakeDbError::DuplicateKey(key.to_string(), table.to_string()));
            }
            prepared.push(row);
        }

        let primary_key = entry.schema.primary_key().to_string();
        let mut ids = Vec::with_capacity(prepared.len());
        for row in prepared {
            ids.push(row.get(&primary_key).cloned().unwrap_or(Bson::Null));
            entry.rows.insert(row)?;
        }
        entry.last_id = last_id;

        debug!(table, count = ids.len(), "inserted rows");
        Ok(ids)
    }

    /// Returns the row with primary key `id`.
    pub fn get(&self, table: &str, id: &Bson) -> FakeDbResult<&Record> {
        self.table(table)?.rows.get(id)
    }

    /// Returns the rows matching `filter` in insertion order, optionally projected to `columns`.
    pub fn select(
        &self,
        table: &str,
        filter: Option<&Expr>,
        columns: Option<&[String]>,
    ) -> FakeDbResult<Vec<Record>> {
        let entry = self.table(table)?;
        entry.check_filter(filter)?;
        if let Some(columns) = columns {
            entry.schema.check_projection(table, columns)?;
        }

        Ok(entry
            .rows
            .scan(|row| matches(row, filter))
            .map(|row| project(row, columns))
            .collect())
    }

    /// Runs a full query: filter, sort, offset, limit, then projection.
    pub fn select_query(&self, table: &str, query: &Query) -> FakeDbResult<Vec<Record>> {
        let entry = self.table(table)?;
        let filter = query.filter.as_ref();
        let columns = query.projection.as_deref();

        entry.check_filter(filter)?;
        if let Some(sort) = &query.sort {
            entry.check_filter(Some(&Expr::Exists(sort.field.clone(), true)))?;
        }
        if let Some(columns) = columns {
            entry.schema.check_projection(table, columns)?;
        }

        let rows = entry.rows.scan(|row| matches(row, filter)).cloned().collect();

        Ok(apply_window(rows, query)
            .iter()
            .map(|row| project(row, columns))
            .collect())
    }

    pub fn count(&self, table: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        let entry = self.table(table)?;
        entry.check_filter(filter)?;

        Ok(entry.rows.scan(|row| matches(row, filter)).count())
    }

    /// Merges `patch` into every row matching `filter` and returns the number of rows updated.
    ///
    /// The patch is checked against the schema before any row changes. A failure
    /// while updating (a primary-key collision) stops the call; rows updated before
    /// it keep their new values.
    pub fn update(&mut self, table: &str, filter: Option<&Expr>, patch: &Document) -> FakeDbResult<usize> {
        let entry = self.table_mut(table)?;
        entry.check_filter(filter)?;
        entry.schema.check_fields(table, patch)?;

        let primary_key = entry.schema.primary_key().to_string();
        let new_key = match patch.get(&primary_key) {
            Some(Bson::Null) => {
                return Err(FakeDbError::Schema(
                    table.to_string(),
                    format!("primary key '{primary_key}' cannot be null"),
                ));
            }
            Some(value) => int_value(value),
            None => None,
        };

        let mut updated = 0;
        for id in entry.matching_ids(filter) {
            entry.rows.update(&id, patch)?;
            if let Some(new_key) = new_key {
                entry.last_id = entry.last_id.max(new_key);
            }
            updated += 1;
        }

        debug!(table, count = updated, "updated rows");
        Ok(updated)
    }

    /// Removes every row matching `filter` and returns the number removed.
    pub fn delete(&mut self, table: &str, filter: Option<&Expr>) -> FakeDbResult<usize> {
        let entry = self.table_mut(table)?;
        entry.check_filter(filter)?;

        let mut deleted = 0;
        for id in entry.matching_ids(filter) {
            entry.rows.delete(&id)?;
            deleted += 1;
        }

        debug!(table, count = deleted, "deleted rows");
        Ok(deleted)
    }

    /// Removes all rows and returns how many there were. Integer keys keep counting up.
    pub fn truncate(&mut self, table: &str) -> FakeDbResult<usize> {
        let entry = self.table_mut(table)?;
        let removed = entry.rows.len();
        entry.rows.clear();

        Ok(removed)
    }

    /// Pairs rows of two tables where `table_a.key_a == table_b.key_b`.
    ///
    /// Each result is `{ <table_a>: row_a, <table_b>: row_b }`, so `filter` addresses
    /// columns as `"<table>.<column>"`. Null keys never join. Results follow the
    /// insertion order of `table_a`, then of `table_b`.
    pub fn join(
        &self,
        table_a: &str,
        table_b: &str,
        key_a: &str,
        key_b: &str,
        filter: Option<&Expr>,
    ) -> FakeDbResult<Vec<Record>> {
        if table_a == table_b {
            return Err(FakeDbError::InvalidArgument(format!(
                "cannot join table {table_a} with itself"
            )));
        }

        let left = self.table(table_a)?;
        let right = self.table(table_b)?;
        left.require_column(key_a)?;
        right.require_column(key_b)?;

        let mut joined = Vec::new();
        for row_a in left.rows.iter() {
            let value_a = match row_a.get(key_a) {
                Some(Bson::Null) | None => continue,
                Some(value) => value,
            };

            for row_b in right.rows.iter() {
                if !row_b.get(key_b).is_some_and(|value_b| values_equal(value_a, value_b)) {
                    continue;
                }

                let mut pair = Document::new();
                pair.insert(table_a, row_a.clone());
                pair.insert(table_b, row_b.clone());

                if matches(&pair, filter) {
                    joined.push(pair);
                }
            }
        }

        Ok(joined)
    }

    fn table(&self, name: &str) -> FakeDbResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| FakeDbError::ContainerNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> FakeDbResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| FakeDbError::ContainerNotFound(name.to_string()))
    }
}
