//! Core types for in-process fake relational and document databases.
//!
//! This crate has no I/O of its own and provides:
//!
//! - **Records** ([`record`]) - The record type, identity keys and dotted-path access
//! - **Query and filtering API** ([`query`]) - Predicate AST, builders and the visitor trait
//! - **Filter documents** ([`filter_doc`]) - Mongo-style filter documents to and from predicates
//! - **Update operators** ([`update`]) - `$set`, `$unset` and `$inc` on dotted paths
//! - **Table schemas** ([`schema`]) - Declared columns and row validation
//! - **Typed models** ([`model`]) - serde conversions between user types and records
//! - **Snapshots** ([`snapshot`]) - The persisted form of a whole database
//! - **Storage backend abstraction** ([`backend`]) - Lock-guarded read-modify-write over a snapshot
//! - **Error handling** ([`error`]) - The error taxonomy shared by every crate
//!
//! # Example
//!
//! ```ignore
//! use fakedb_core::query::Filter;
//! use fakedb_core::record::get_path;
//! use bson::doc;
//!
//! let event = doc! { "type": "click", "meta": { "x": 1, "y": 2 } };
//! assert_eq!(get_path(&event, "meta.x"), Some(&bson::Bson::Int32(1)));
//!
//! let filter = Filter::from_document(&doc! { "meta.x": 1 })?;
//! assert_eq!(filter, Filter::eq("meta.x", 1));
//! ```

#[allow(unused_extern_crates)]
extern crate self as fakedb_core;

pub mod backend;
pub mod error;
pub mod filter_doc;
pub mod model;
pub mod query;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod update;
