//! In-process fake relational and document databases for tests.
//!
//! This crate is the entry point for users of fakedb. It re-exports the core
//! types from the sub-crates and provides database handles that run every
//! operation as a lock-guarded read-modify-write against a storage backend:
//! purely in memory, or a snapshot file that several threads and processes can
//! share.
//!
//! # Features
//!
//! - **Relational database** - Tables with declared schemas, filtered select/update/delete and joins
//! - **Document database** - Schemaless collections with dotted-path filters and `$set`/`$unset`/`$inc` updates
//! - **Local snapshots** - Atomic, lock-guarded persistence to a single file
//! - **Typed models** - Insert and read back serde types
//! - **Async entry points** - The same operations on tokio's blocking pool
//!
//! # Quick Start
//!
//! ```ignore
//! use fakedb::prelude::*;
//! use bson::doc;
//!
//! let db = DatabaseOptions::named("target/fakedb", "events")?.build().open_document();
//! let events = db.collection("events");
//!
//! events.insert_one(doc! { "type": "click", "meta": { "x": 1, "y": 2 } })?;
//! events.insert_one(doc! { "type": "view", "meta": { "x": 5 } })?;
//!
//! let clicks = events.find(Some(&Filter::eq("meta.x", 1)))?;
//! assert_eq!(clicks.len(), 1);
//!
//! db.reset()?;
//! ```
//!
//! # Relational tables
//!
//! ```ignore
//! use fakedb::prelude::*;
//! use bson::doc;
//!
//! let db = RelationalDb::in_memory();
//! db.create_table("users", TableSchema::from_pairs([("id", "int"), ("name", "str")])?)?;
//! db.create_table("orders", TableSchema::from_pairs([("id", "int"), ("user_id", "int"), ("total", "float")])?)?;
//!
//! db.insert("users", doc! { "id": 1, "name": "Ana" })?;
//! db.insert("orders", doc! { "id": 10, "user_id": 1, "total": 25.0 })?;
//!
//! let rows = db.join("users", "orders", "id", "user_id", Some(&Filter::gt("orders.total", 20.0)))?;
//! assert_eq!(rows[0].get_document("users")?.get_str("name")?, "Ana");
//! ```

#[allow(unused_extern_crates)]
extern crate self as fakedb;

pub mod asynchronous;
pub mod document;
pub mod options;
pub mod prelude;
pub mod relational;
pub mod storage;

pub use fakedb_core::{backend, error, filter_doc, model, query, record, schema, snapshot, update};

/// In-memory database state and backend.
pub mod memory {
    pub use fakedb_memory::*;
}

/// Snapshot-file backend.
pub mod local {
    pub use fakedb_local::*;
}
