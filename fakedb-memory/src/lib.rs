//! In-memory fake databases for fakedb.
//!
//! This crate holds the data structures behind both fake databases and a
//! process-local storage backend for them.
//!
//! # Features
//!
//! - **Record Store** ([`record_store`]) - Identity-indexed, insertion-ordered record container
//! - **Relational database** ([`relational`]) - Tables with declared schemas, select/update/delete and key joins
//! - **Document database** ([`document`]) - Schemaless collections with nested-path filters
//! - **Predicate evaluation** ([`evaluator`]) - Filter matching and result ordering
//! - **In-memory backend** ([`store`]) - Lock-guarded state shared between threads
//!
//! # Quick Start
//!
//! ```ignore
//! use fakedb_memory::FakeRelationalDb;
//! use fakedb_core::{query::Filter, schema::TableSchema};
//! use bson::doc;
//!
//! let mut db = FakeRelationalDb::new();
//! db.create_table("users", TableSchema::from_pairs([("id", "int"), ("name", "str")])?)?;
//! db.insert("users", doc! { "id": 1, "name": "Ana" })?;
//!
//! assert_eq!(db.update("users", Some(&Filter::eq("id", 1)), &doc! { "name": "Ana Maria" })?, 1);
//! ```

#[allow(unused_extern_crates)]
extern crate self as fakedb_memory;

pub mod document;
pub mod evaluator;
pub mod record_store;
pub mod relational;
pub mod store;

pub use document::FakeDocumentDb;
pub use record_store::RecordStore;
pub use relational::{FakeRelationalDb, Table};
pub use store::{MemoryStorage, MemoryStorageBuilder};
