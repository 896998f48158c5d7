//! Conversion between typed models and plain records.
//!
//! The databases only ever see [`Record`]s. Types that implement [`Model`] get
//! serde-based conversions through [`ModelExt`], which is all a typed binding
//! layer needs to call `insert` and read back query results.
//!
//! ```ignore
//! use fakedb::model::{Model, ModelExt};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: i64,
//!     pub name: String,
//! }
//!
//! impl Model for User {
//!     fn container_name() -> &'static str {
//!         "users"
//!     }
//! }
//!
//! let record = User { id: 1, name: "Ana".into() }.to_record()?;
//! ```

use bson::{Document, de::deserialize_from_document, ser::serialize_to_document};
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};

use crate::{error::FakeDbResult, record::Record};

/// A typed row or document.
pub trait Model: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// The table or collection this type is stored in.
    fn container_name() -> &'static str;
}

/// Serialization helpers, implemented for every [`Model`].
pub trait ModelExt: Model {
    /// Converts this model into a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the model does not serialize to a document.
    fn to_record(&self) -> FakeDbResult<Record>;

    /// Builds a model from a record. Fields the model does not declare are ignored
    /// unless the model itself denies unknown fields.
    fn from_record(record: Record) -> FakeDbResult<Self>;

    /// Converts this model into a JSON value.
    fn to_json(&self) -> FakeDbResult<Value>;

    /// Builds a model from a JSON value.
    fn from_json(value: Value) -> FakeDbResult<Self>;
}

impl<M: Model> ModelExt for M {
    fn to_record(&self) -> FakeDbResult<Record> {
        Ok(serialize_to_document(self)?)
    }

    fn from_record(record: Record) -> FakeDbResult<Self> {
        Ok(deserialize_from_document(record)?)
    }

    fn to_json(&self) -> FakeDbResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> FakeDbResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Converts a record into a JSON value, handy for assertions and debugging output.
pub fn record_to_json(record: &Document) -> FakeDbResult<Value> {
    Ok(to_value(record)?)
}
