//! Convenient re-exports of commonly used types from fakedb.
//!
//! ```ignore
//! use fakedb::prelude::*;
//! ```
//!
//! This provides access to:
//! - Database handles and construction options
//! - Storage backends
//! - Query construction, filtering and updates
//! - Schemas, typed models and error types

pub use crate::{
    asynchronous::{AsyncDocumentDb, AsyncRelationalDb},
    document::{Collection, DocumentDb},
    options::{DatabaseOptions, DatabaseOptionsBuilder},
    relational::{RelationalDb, Table},
    storage::Storage,
};
pub use fakedb_core::{
    backend::{Persist, StorageBackend},
    error::{FakeDbError, FakeDbResult},
    model::{Model, ModelExt},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, Sort, SortDirection},
    record::{ID_FIELD, Record},
    schema::{ColumnType, TableSchema},
    snapshot::Snapshot,
    update::Update,
};
pub use fakedb_local::LocalStorage;
pub use fakedb_memory::{FakeDocumentDb, FakeRelationalDb, MemoryStorage};
