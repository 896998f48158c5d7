//! Snapshot encoding shared by every storage backend.
//!
//! A snapshot is a single BSON document:
//!
//! ```text
//! { format: "fakedb-snapshot", version: 1, kind: "document", saved_at: <datetime>, state: { ... } }
//! ```
//!
//! BSON keeps integer widths, datetimes, binaries and nesting intact, so any state
//! reachable through the public API survives `encode` followed by `decode`.

use std::path::Path;

use bson::{
    Bson, DateTime, Document, de::deserialize_from_document, de::deserialize_from_slice, doc,
    ser::serialize_to_document, ser::serialize_to_vec,
};
use serde::{Deserialize, Serialize};

use crate::error::{FakeDbError, FakeDbResult};

pub const SNAPSHOT_FORMAT: &str = "fakedb-snapshot";
pub const SNAPSHOT_VERSION: i32 = 1;

/// Database state that can be persisted as a whole.
pub trait Snapshot: Serialize + for<'de> Deserialize<'de> + Default + Clone + Send + 'static {
    /// Tag stored in the snapshot header; loading a snapshot of another kind fails.
    const KIND: &'static str;
}

/// Serializes `state` into snapshot bytes.
pub fn encode<S: Snapshot>(state: &S) -> FakeDbResult<Vec<u8>> {
    let snapshot = doc! {
        "format": SNAPSHOT_FORMAT,
        "version": SNAPSHOT_VERSION,
        "kind": S::KIND,
        "saved_at": DateTime::now(),
        "state": serialize_to_document(state)?,
    };

    Ok(serialize_to_vec(&snapshot)?)
}

/// Decodes snapshot bytes read from `path`. Any malformed content is [`FakeDbError::CorruptSnapshot`].
pub fn decode<S: Snapshot>(path: &Path, bytes: &[u8]) -> FakeDbResult<S> {
    let corrupt = |message: String| FakeDbError::CorruptSnapshot(path.to_path_buf(), message);

    let snapshot: Document = deserialize_from_slice(bytes).map_err(|err| corrupt(err.to_string()))?;

    match snapshot.get("format") {
        Some(Bson::String(format)) if format == SNAPSHOT_FORMAT => {}
        _ => return Err(corrupt("not a fakedb snapshot".into())),
    }
    match snapshot.get("version") {
        Some(Bson::Int32(SNAPSHOT_VERSION)) => {}
        other => return Err(corrupt(format!("unsupported snapshot version {other:?}"))),
    }
    match snapshot.get("kind") {
        Some(Bson::String(kind)) if kind == S::KIND => {}
        other => {
            return Err(corrupt(format!(
                "expected a {} snapshot, found {:?}",
                S::KIND,
                other
            )));
        }
    }

    match snapshot.get("state") {
        Some(Bson::Document(state)) => {
            deserialize_from_document(state.clone()).map_err(|err| corrupt(err.to_string()))
        }
        _ => Err(corrupt("missing state".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
        labels: Vec<String>,
    }

    impl Snapshot for Counter {
        const KIND: &'static str = "counter";
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Other {}

    impl Snapshot for Other {
        const KIND: &'static str = "other";
    }

    #[test]
    fn encode_then_decode() {
        let state = Counter { value: 12, labels: vec!["a".into()] };
        let bytes = encode(&state).unwrap();

        assert_eq!(decode::<Counter>(Path::new("x"), &bytes).unwrap(), state);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decode::<Counter>(Path::new("snap"), b"not-bson").unwrap_err();
        assert!(matches!(err, FakeDbError::CorruptSnapshot(ref path, _) if path == &PathBuf::from("snap")));
    }

    #[test]
    fn kind_mismatch_is_corrupt() {
        let bytes = encode(&Other {}).unwrap();
        assert!(matches!(
            decode::<Counter>(Path::new("snap"), &bytes),
            Err(FakeDbError::CorruptSnapshot(_, _))
        ));
    }

    #[test]
    fn foreign_bson_is_corrupt() {
        let bytes = serialize_to_vec(&doc! { "hello": "world" }).unwrap();
        assert!(decode::<Counter>(Path::new("snap"), &bytes).is_err());
    }
}
