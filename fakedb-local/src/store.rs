//! Snapshot-file storage backend.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use fakedb_core::{
    backend::{Persist, StorageBackend},
    error::FakeDbResult,
    snapshot::{Snapshot, decode, encode},
};

use crate::lock::{SnapshotLock, lock_path_for};

/// How often a waiting caller retries a lock file held by another process.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Persists a database as a single snapshot file guarded by an advisory lock.
///
/// Reads through [`StorageBackend::load`] skip the lock: they may see an older
/// snapshot but never a half-written one, because every save writes a temporary
/// file and renames it over the target.
///
/// # Example
///
/// ```ignore
/// use fakedb_local::LocalStorage;
/// use fakedb_memory::FakeDocumentDb;
/// use fakedb_core::backend::{Persist, StorageBackend};
/// use std::time::Duration;
///
/// let storage = LocalStorage::builder("/tmp/tests/events.fakedb")
///     .lock_timeout(Duration::from_secs(5))
///     .build();
///
/// let removed = storage.with_lock(|db: &mut FakeDocumentDb| {
///     let removed = db.delete_many("events", None)?;
///     Ok((removed, Persist::when(removed > 0)))
/// })?;
/// ```
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
    lock_timeout: Option<Duration>,
    poll_interval: Duration,
}

impl LocalStorage {
    /// Storage at `path` that waits for the lock without a timeout.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::builder(path).build()
    }

    pub fn builder(path: impl Into<PathBuf>) -> LocalStorageBuilder {
        LocalStorageBuilder {
            path: path.into(),
            lock_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The advisory lock file path, `<snapshot>.lock`.
    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    fn lock(&self) -> FakeDbResult<SnapshotLock> {
        SnapshotLock::acquire(&self.path, self.lock_timeout, self.poll_interval)
    }

    fn read<S: Snapshot>(&self) -> FakeDbResult<S> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "loaded snapshot");
                decode(&self.path, &bytes)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot yet, starting empty");
                Ok(S::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write<S: Snapshot>(&self, state: &S) -> FakeDbResult<()> {
        let bytes = encode(state)?;
        let created = !self.path.exists();

        write_atomic(&self.path, &bytes)?;

        if created {
            info!(path = %self.path.display(), kind = S::KIND, "created snapshot");
        } else {
            debug!(path = %self.path.display(), bytes = bytes.len(), "saved snapshot");
        }

        Ok(())
    }
}

/// Writes `bytes` to a unique temporary file next to `path`, syncs it, then renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let temp_path = PathBuf::from(temp_name);

    let result = write_file(&temp_path, bytes).and_then(|_| fs::rename(&temp_path, path));

    if let Err(err) = &result {
        warn!(
            temp_path = %temp_path.display(),
            error = %err,
            "snapshot write failed, cleaning up temp file"
        );
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl<S: Snapshot> StorageBackend<S> for LocalStorage {
    fn load(&self) -> FakeDbResult<S> {
        self.read()
    }

    fn save(&self, state: &S) -> FakeDbResult<()> {
        let _lock = self.lock()?;
        self.write(state)
    }

    fn with_lock<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&mut S) -> FakeDbResult<(R, Persist)>,
    {
        let _lock = self.lock()?;
        let mut state = self.read::<S>()?;

        let (result, persist) = op(&mut state)?;
        if persist == Persist::Save {
            self.write(&state)?;
        }

        Ok(result)
    }

    fn reset(&self) -> FakeDbResult<()> {
        let _lock = self.lock()?;

        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed snapshot");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Builder for [`LocalStorage`].
#[derive(Debug, Clone)]
pub struct LocalStorageBuilder {
    path: PathBuf,
    lock_timeout: Option<Duration>,
    poll_interval: Duration,
}

impl LocalStorageBuilder {
    /// Maximum wait for the lock; `None` waits until it is free.
    pub fn lock_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.lock_timeout = timeout.into();
        self
    }

    /// Interval between attempts on a lock file held by another process.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn build(self) -> LocalStorage {
        LocalStorage {
            path: self.path,
            lock_timeout: self.lock_timeout,
            poll_interval: self.poll_interval,
        }
    }
}
