//! Error types and result types for fake database operations.
//!
//! Every variant names the table or collection involved and, where one exists,
//! the identity value, so a failing assertion can be diagnosed from the message
//! alone. Use [`FakeDbResult<T>`] as the return type for fallible operations.

use std::{path::PathBuf, time::Duration};

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the fake databases and their storage backends.
#[derive(Error, Debug)]
pub enum FakeDbError {
    /// The requested table or collection does not exist.
    #[error("Table or collection not found: {0}")]
    ContainerNotFound(String),
    /// The requested record was not found.
    /// The first argument is the identity value, the second is the table or collection name.
    #[error("Record {0} not found in {1}")]
    RecordNotFound(String, String),
    /// A record with the given identity already exists.
    /// The first argument is the identity value, the second is the table or collection name.
    #[error("Duplicate key {0} in {1}")]
    DuplicateKey(String, String),
    /// A row violates the declared column schema of a table.
    /// The first argument is the table name, the second describes the violation.
    #[error("Schema violation in table {0}: {1}")]
    Schema(String, String),
    /// A table or collection with the given name already exists.
    #[error("Table or collection already exists: {0}")]
    AlreadyExists(String),
    /// The snapshot lock could not be acquired before the configured timeout elapsed.
    #[error("Timed out after {1:?} waiting for the lock on {0}")]
    LockTimeout(PathBuf, Duration),
    /// The caller already holds the snapshot lock and tried to take it again.
    #[error("Reentrant lock on {0} is not supported")]
    Deadlock(PathBuf),
    /// The persisted snapshot could not be decoded.
    #[error("Corrupt snapshot at {0}: {1}")]
    CorruptSnapshot(PathBuf, String),
    /// An argument was rejected before any state was touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Conversion between a typed model and a record failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(String),
    /// The execution environment failed, e.g. a blocking task panicked.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl FakeDbError {
    /// Returns `true` for the "not found" family (missing table, collection or record).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FakeDbError::ContainerNotFound(_) | FakeDbError::RecordNotFound(_, _)
        )
    }
}

/// A specialized `Result` type for fake database operations.
pub type FakeDbResult<T> = Result<T, FakeDbError>;

impl From<BsonError> for FakeDbError {
    fn from(err: BsonError) -> Self {
        FakeDbError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for FakeDbError {
    fn from(err: SerdeJsonError) -> Self {
        FakeDbError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FakeDbError {
    fn from(err: std::io::Error) -> Self {
        FakeDbError::Io(err.to_string())
    }
}
