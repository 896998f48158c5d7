//! Update operators applied by `update_one` / `update_many`.
//!
//! An [`Update`] is an ordered list of field operations on dotted paths. It is
//! applied to a copy of the record, so a failing operation leaves that record
//! untouched.
//!
//! ```ignore
//! use fakedb::update::Update;
//!
//! let update = Update::new().set_field("name", "Ana Maria").inc("visits", 1);
//! let same = Update::from_document(&doc! {
//!     "$set": { "name": "Ana Maria" },
//!     "$inc": { "visits": 1 },
//! })?;
//! ```

use bson::{Bson, Document};

use crate::{
    error::{FakeDbError, FakeDbResult},
    record::{describe, get_path, remove_path, set_path},
};

/// A single field operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Sets the field at the path, creating parents.
    Set(String, Bson),
    /// Removes the field at the path if present.
    Unset(String),
    /// Adds a number to the field at the path; a missing field counts as zero.
    Inc(String, Bson),
}

impl UpdateOp {
    /// The field path the operation targets.
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set(path, _) | UpdateOp::Unset(path) | UpdateOp::Inc(path, _) => path,
        }
    }
}

/// An ordered list of field operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    /// Creates an update with no operations.
    pub fn new() -> Self {
        Update::default()
    }

    /// Creates an update that sets every field of `fields`.
    pub fn set(fields: Document) -> Self {
        Update {
            ops: fields
                .into_iter()
                .map(|(path, value)| UpdateOp::Set(path, value))
                .collect(),
        }
    }

    /// Appends a `$set` of one field.
    pub fn set_field(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    /// Appends an `$unset` of one field.
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(path.into()));
        self
    }

    /// Appends an `$inc` of one field.
    pub fn inc(mut self, path: impl Into<String>, by: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Inc(path.into(), by.into()));
        self
    }

    /// Parses `{"$set": {..}, "$unset": {..}, "$inc": {..}}`.
    ///
    /// A document without any operator key is treated as a `$set` of all its fields.
    pub fn from_document(update: &Document) -> FakeDbResult<Self> {
        let operators = update.keys().filter(|key| key.starts_with('$')).count();

        if operators == 0 {
            return Ok(Update::set(update.clone()));
        }
        if operators != update.len() {
            return Err(FakeDbError::InvalidArgument(
                "update document mixes operators and plain fields".into(),
            ));
        }

        let mut ops = Vec::new();
        for (operator, fields) in update {
            let fields = match fields {
                Bson::Document(fields) => fields,
                _ => {
                    return Err(FakeDbError::InvalidArgument(format!(
                        "'{operator}' expects a document"
                    )));
                }
            };

            for (path, value) in fields {
                ops.push(match operator.as_str() {
                    "$set" => UpdateOp::Set(path.clone(), value.clone()),
                    "$unset" => UpdateOp::Unset(path.clone()),
                    "$inc" => UpdateOp::Inc(path.clone(), value.clone()),
                    _ => {
                        return Err(FakeDbError::InvalidArgument(format!(
                            "unknown update operator '{operator}'"
                        )));
                    }
                });
            }
        }

        Ok(Update { ops })
    }

    /// Returns the operations in application order.
    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Returns `true` if the update has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns `true` if any operation targets `field` or a path below it.
    pub fn touches(&self, field: &str) -> bool {
        self.ops.iter().any(|op| {
            let path = op.path();
            path == field
                || path
                    .strip_prefix(field)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Applies the update to a copy of `record` and returns the copy.
    pub fn apply(&self, record: &Document) -> FakeDbResult<Document> {
        let mut updated = record.clone();

        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => {
                    set_path(&mut updated, path, value.clone())?;
                }
                UpdateOp::Unset(path) => {
                    remove_path(&mut updated, path);
                }
                UpdateOp::Inc(path, by) => {
                    let current = get_path(&updated, path).cloned();
                    let next = increment(path, current.as_ref(), by)?;
                    set_path(&mut updated, path, next)?;
                }
            }
        }

        Ok(updated)
    }
}

fn increment(path: &str, current: Option<&Bson>, by: &Bson) -> FakeDbResult<Bson> {
    let not_numeric = |value: &Bson| {
        FakeDbError::InvalidArgument(format!(
            "cannot increment '{}': {} is not a number",
            path,
            describe(value)
        ))
    };

    Ok(match (current.unwrap_or(&Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).saturating_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.saturating_add(i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.saturating_add(*b)),
        (a, b) => match (as_f64(a), as_f64(b)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            (None, _) => return Err(not_numeric(a)),
            (_, None) => return Err(not_numeric(b)),
        },
    })
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(f64::from(*value)),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_merges_fields() {
        let record = doc! { "id": 1, "name": "Ana" };
        let updated = Update::set(doc! { "name": "Ana Maria", "age": 30 }).apply(&record).unwrap();

        assert_eq!(updated, doc! { "id": 1, "name": "Ana Maria", "age": 30 });
    }

    #[test]
    fn inc_preserves_integer_width() {
        let record = doc! { "counter": 10 };
        let updated = Update::new().inc("counter", 1).apply(&record).unwrap();
        assert_eq!(updated.get("counter"), Some(&Bson::Int32(11)));

        let updated = Update::new().inc("missing", 2i64).apply(&record).unwrap();
        assert_eq!(updated.get("missing"), Some(&Bson::Int64(2)));

        let updated = Update::new().inc("counter", 0.5).apply(&record).unwrap();
        assert_eq!(updated.get("counter"), Some(&Bson::Double(10.5)));
    }

    #[test]
    fn inc_targets_the_field_a_filter_reads() {
        let record = doc! { "a.b": 1, "a": { "b": 10 } };
        let updated = Update::new().inc("a.b", 1).apply(&record).unwrap();

        assert_eq!(updated, doc! { "a.b": 2, "a": { "b": 10 } });
    }

    #[test]
    fn inc_on_text_fails_and_leaves_record() {
        let record = doc! { "name": "Ana" };
        let update = Update::new().set_field("x", 1).inc("name", 1);

        assert!(update.apply(&record).is_err());
        assert_eq!(record, doc! { "name": "Ana" });
    }

    #[test]
    fn from_document_operators() {
        let update = Update::from_document(&doc! {
            "$set": { "meta.x": 5 },
            "$unset": { "old": "" },
            "$inc": { "n": 1 },
        })
        .unwrap();

        let updated = update.apply(&doc! { "old": true, "n": 1, "meta": { "x": 1 } }).unwrap();
        assert_eq!(updated, doc! { "n": 2, "meta": { "x": 5 } });
    }

    #[test]
    fn from_document_plain_is_set() {
        let update = Update::from_document(&doc! { "name": "B" }).unwrap();
        assert_eq!(update, Update::new().set_field("name", "B"));
    }

    #[test]
    fn from_document_rejects_bad_shapes() {
        assert!(Update::from_document(&doc! { "$set": { "a": 1 }, "b": 2 }).is_err());
        assert!(Update::from_document(&doc! { "$push": { "a": 1 } }).is_err());
        assert!(Update::from_document(&doc! { "$set": 1 }).is_err());
    }

    #[test]
    fn touches_matches_prefixes_on_segment_boundaries() {
        let update = Update::new().set_field("_id.part", 1).set_field("idx", 2);

        assert!(update.touches("_id"));
        assert!(update.touches("idx"));
        assert!(!update.touches("id"));
    }
}
