//! Database construction options.
//!
//! ```ignore
//! use fakedb::options::DatabaseOptions;
//! use std::time::Duration;
//!
//! let events = DatabaseOptions::named("target/fakedb", "events")?
//!     .lock_timeout(Duration::from_secs(5))
//!     .build()
//!     .open_document();
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::debug;

use fakedb_core::{
    error::{FakeDbError, FakeDbResult},
    snapshot::Snapshot,
};
use fakedb_local::{DEFAULT_POLL_INTERVAL, LocalStorage};
use fakedb_memory::{FakeDocumentDb, FakeRelationalDb, MemoryStorage};

use crate::{document::DocumentDb, relational::RelationalDb, storage::Storage};

/// File extension of snapshots placed by [`DatabaseOptions::named`].
pub const SNAPSHOT_EXTENSION: &str = "fakedb";

/// How a database is stored and locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    path: Option<PathBuf>,
    lock_timeout: Option<Duration>,
    auto_create: bool,
    poll_interval: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            path: None,
            lock_timeout: None,
            auto_create: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl DatabaseOptions {
    pub fn builder() -> DatabaseOptionsBuilder {
        DatabaseOptionsBuilder::default()
    }

    /// Starts a builder whose snapshot lives at `<root>/<name>.fakedb`.
    ///
    /// # Errors
    ///
    /// Returns [`FakeDbError::InvalidArgument`] if `name` is empty or is not a
    /// plain file name.
    pub fn named(root: impl AsRef<Path>, name: &str) -> FakeDbResult<DatabaseOptionsBuilder> {
        validate_name(name)?;

        let path = root.as_ref().join(format!("{name}.{SNAPSHOT_EXTENSION}"));
        Ok(Self::builder().path(path))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    pub fn auto_create(&self) -> bool {
        self.auto_create
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Opens a relational database on the configured storage.
    ///
    /// Nothing touches disk until the first operation.
    pub fn open_relational(&self) -> RelationalDb<Storage<FakeRelationalDb>> {
        RelationalDb::new(self.storage())
    }

    /// Opens a document database on the configured storage.
    pub fn open_document(&self) -> DocumentDb<Storage<FakeDocumentDb>> {
        DocumentDb::new(self.storage()).with_auto_create(self.auto_create)
    }

    fn storage<S: Snapshot>(&self) -> Storage<S> {
        debug!(kind = S::KIND, path = ?self.path, lock_timeout = ?self.lock_timeout, "opening database");

        match &self.path {
            Some(path) => Storage::Local(
                LocalStorage::builder(path.clone())
                    .lock_timeout(self.lock_timeout)
                    .poll_interval(self.poll_interval)
                    .build(),
            ),
            None => {
                let builder = MemoryStorage::<S>::builder();
                let builder = match self.lock_timeout {
                    Some(timeout) => builder.lock_timeout(timeout),
                    None => builder,
                };
                Storage::Memory(builder.build())
            }
        }
    }
}

fn validate_name(name: &str) -> FakeDbResult<()> {
    if name.trim().is_empty() {
        return Err(FakeDbError::InvalidArgument("database name must not be empty".into()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(FakeDbError::InvalidArgument(format!(
            "database name {name:?} must be a plain file name"
        )));
    }

    Ok(())
}

/// Builder for [`DatabaseOptions`].
#[derive(Debug, Default)]
pub struct DatabaseOptionsBuilder {
    options: DatabaseOptions,
}

impl DatabaseOptionsBuilder {
    /// Snapshot file location. Without a path the database lives in memory.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.path = Some(path.into());
        self
    }

    /// Maximum wait for the lock; `None` waits indefinitely.
    pub fn lock_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.options.lock_timeout = timeout.into();
        self
    }

    /// Whether inserting into a missing collection creates it. Defaults to `true`.
    pub fn auto_create(mut self, auto_create: bool) -> Self {
        self.options.auto_create = auto_create;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    pub fn build(self) -> DatabaseOptions {
        self.options
    }
}
