//! Records, identity keys and dotted-path access.
//!
//! A [`Record`] is an ordered mapping of field name to [`Bson`] value. Both fake
//! databases store records; the relational variant restricts them to declared
//! scalar columns while the document variant accepts arbitrary nesting.

use std::fmt;

use bson::{Bson, Document};
use uuid::Uuid;

use crate::error::{FakeDbError, FakeDbResult};

/// A stored row or document.
pub type Record = Document;

/// Identity field of every document in the document database.
pub const ID_FIELD: &str = "_id";

/// Canonical, hashable form of an identity value.
///
/// `Int32(1)` and `Int64(1)` map to the same key so a row inserted with one
/// integer width can be looked up with the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Bool(bool),
    Int(i64),
    Str(String),
    DateTime(i64),
    ObjectId([u8; 12]),
    Binary(u8, Vec<u8>),
}

impl RecordKey {
    /// Builds the key for an identity value, or `None` if the value cannot identify a record.
    ///
    /// Nulls, doubles, arrays and nested documents are rejected.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Boolean(value) => Some(RecordKey::Bool(*value)),
            Bson::Int32(value) => Some(RecordKey::Int(i64::from(*value))),
            Bson::Int64(value) => Some(RecordKey::Int(*value)),
            Bson::String(value) => Some(RecordKey::Str(value.clone())),
            Bson::DateTime(value) => Some(RecordKey::DateTime(value.timestamp_millis())),
            Bson::ObjectId(value) => Some(RecordKey::ObjectId(value.bytes())),
            Bson::Binary(binary) => Some(RecordKey::Binary(u8::from(binary.subtype), binary.bytes.clone())),
            _ => None,
        }
    }

    /// Like [`RecordKey::from_bson`] but reports the rejected value as an error.
    pub fn try_from_bson(value: &Bson, container: &str) -> FakeDbResult<Self> {
        Self::from_bson(value).ok_or_else(|| {
            FakeDbError::InvalidArgument(format!(
                "{} is not a valid identity value in {}",
                describe(value),
                container
            ))
        })
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Bool(value) => write!(f, "{value}"),
            RecordKey::Int(value) => write!(f, "{value}"),
            RecordKey::Str(value) => write!(f, "{value}"),
            RecordKey::DateTime(millis) => write!(f, "datetime({millis})"),
            RecordKey::ObjectId(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            RecordKey::Binary(subtype, bytes) => write!(f, "binary({subtype}, {} bytes)", bytes.len()),
        }
    }
}

/// Renders a value for error messages; strings are shown without quotes.
pub fn describe(value: &Bson) -> String {
    match value {
        Bson::String(value) => value.clone(),
        other => other.to_string(),
    }
}

/// Generates a fresh document identity: a random UUID rendered as a string.
pub fn generate_id() -> Bson {
    Bson::String(Uuid::new_v4().to_string())
}

/// Resolves a dotted path such as `"meta.x"` or `"tags.0"` against a record.
///
/// A top-level key that literally contains dots takes precedence over traversal.
pub fn get_path<'a>(record: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn get_path_mut<'a>(record: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = record.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets the value at a dotted path, creating intermediate documents as needed.
///
/// Like [`get_path`], an existing top-level key that literally contains dots is
/// written in place. Returns the previous value. Fails if an intermediate
/// segment holds a non-document value.
pub fn set_path(record: &mut Document, path: &str, value: Bson) -> FakeDbResult<Option<Bson>> {
    if let Some(existing) = record.get_mut(path) {
        return Ok(Some(std::mem::replace(existing, value)));
    }

    let segments = split_path(path)?;
    let (leaf, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Err(FakeDbError::InvalidArgument("empty field path".into())),
    };

    let mut current = record;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Bson::Document(Document::new()));

        current = match entry {
            Bson::Document(doc) => doc,
            other => {
                return Err(FakeDbError::InvalidArgument(format!(
                    "cannot set '{}': '{}' holds {}",
                    path,
                    segment,
                    describe(other)
                )));
            }
        };
    }

    Ok(current.insert(leaf.to_string(), value))
}

/// Removes the value at a dotted path, returning it if it was present.
pub fn remove_path(record: &mut Document, path: &str) -> Option<Bson> {
    if record.contains_key(path) {
        return record.remove(path);
    }

    match path.rsplit_once('.') {
        Some((parent, leaf)) => match get_path_mut(record, parent)? {
            Bson::Document(doc) => doc.remove(leaf),
            _ => None,
        },
        None => None,
    }
}

fn split_path(path: &str) -> FakeDbResult<Vec<&str>> {
    let segments = path.split('.').collect::<Vec<_>>();

    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(FakeDbError::InvalidArgument(format!("invalid field path '{path}'")));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn integer_widths_share_a_key() {
        assert_eq!(
            RecordKey::from_bson(&Bson::Int32(7)),
            RecordKey::from_bson(&Bson::Int64(7))
        );
        assert_ne!(
            RecordKey::from_bson(&Bson::Int64(7)),
            RecordKey::from_bson(&Bson::String("7".into()))
        );
    }

    #[test]
    fn null_and_documents_are_not_identities() {
        assert!(RecordKey::from_bson(&Bson::Null).is_none());
        assert!(RecordKey::from_bson(&Bson::Document(doc! {})).is_none());
        assert!(RecordKey::try_from_bson(&Bson::Double(1.5), "events").is_err());
    }

    #[test]
    fn get_path_walks_documents_and_arrays() {
        let record = doc! { "meta": { "x": 1, "tags": ["a", "b"] } };

        assert_eq!(get_path(&record, "meta.x"), Some(&Bson::Int32(1)));
        assert_eq!(get_path(&record, "meta.tags.1"), Some(&Bson::String("b".into())));
        assert_eq!(get_path(&record, "meta.y"), None);
        assert_eq!(get_path(&record, "meta.x.z"), None);
    }

    #[test]
    fn literal_dotted_key_wins() {
        let record = doc! { "a.b": 1, "a": { "b": 2 } };
        assert_eq!(get_path(&record, "a.b"), Some(&Bson::Int32(1)));
    }

    #[test]
    fn literal_dotted_key_is_read_written_and_removed_alike() {
        let mut record = doc! { "a.b": 1, "a": { "b": 2 } };

        assert_eq!(set_path(&mut record, "a.b", Bson::Int32(5)).unwrap(), Some(Bson::Int32(1)));
        assert_eq!(get_path(&record, "a.b"), Some(&Bson::Int32(5)));
        assert_eq!(record.get_document("a").unwrap(), &doc! { "b": 2 });

        assert_eq!(remove_path(&mut record, "a.b"), Some(Bson::Int32(5)));
        assert_eq!(get_path(&record, "a.b"), Some(&Bson::Int32(2)));
    }

    #[test]
    fn set_path_creates_parents() {
        let mut record = doc! { "type": "click" };
        set_path(&mut record, "meta.x", Bson::Int32(3)).unwrap();

        assert_eq!(record, doc! { "type": "click", "meta": { "x": 3 } });
    }

    #[test]
    fn set_path_rejects_scalar_parent() {
        let mut record = doc! { "meta": 1 };
        assert!(matches!(
            set_path(&mut record, "meta.x", Bson::Int32(3)),
            Err(FakeDbError::InvalidArgument(_))
        ));
        assert!(set_path(&mut record, "a..b", Bson::Null).is_err());
    }

    #[test]
    fn remove_path_nested() {
        let mut record = doc! { "meta": { "x": 1, "y": 2 } };

        assert_eq!(remove_path(&mut record, "meta.x"), Some(Bson::Int32(1)));
        assert_eq!(remove_path(&mut record, "meta.z"), None);
        assert_eq!(record, doc! { "meta": { "y": 2 } });
    }

    #[test]
    fn generated_ids_are_unique_strings() {
        let a = generate_id();
        let b = generate_id();

        assert!(matches!(a, Bson::String(_)));
        assert_ne!(a, b);
    }
}
