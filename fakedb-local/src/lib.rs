//! Local snapshot storage backend for fakedb.
//!
//! This crate persists a whole fake database as one BSON snapshot file and
//! serializes read-modify-write cycles on it with an advisory lock, so several
//! test threads or processes can share one database safely.
//!
//! # Features
//!
//! - **Atomic saves** - Every save writes a temporary file, syncs it and renames it over the snapshot
//! - **Scoped locking** ([`lock`]) - Thread and process exclusion with bounded waits
//! - **Reentry detection** - Nested `with_lock` on the same path fails with `Deadlock`
//!
//! # Quick Start
//!
//! ```ignore
//! use fakedb_local::LocalStorage;
//! use fakedb_memory::FakeRelationalDb;
//! use fakedb_core::backend::{Persist, StorageBackend};
//!
//! let storage = LocalStorage::new("target/test-db/app.fakedb");
//! storage.with_lock(|db: &mut FakeRelationalDb| {
//!     db.create_table_if_not_exists("users", TableSchema::from_pairs([("id", "int"), ("name", "str")])?)?;
//!     Ok(((), Persist::Save))
//! })?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as fakedb_local;

pub mod lock;
pub mod store;

pub use lock::SnapshotLock;
pub use store::{DEFAULT_POLL_INTERVAL, LocalStorage, LocalStorageBuilder};
