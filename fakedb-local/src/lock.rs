//! Advisory lock guarding a snapshot path.
//!
//! The lock has two layers:
//!
//! 1. A process-wide registry of held paths, so threads of one process queue
//!    up on a condition variable instead of spinning on the file lock.
//! 2. An exclusive `fs2` lock on `<snapshot>.lock`, which excludes other processes.
//!
//! Both are released when the [`SnapshotLock`] guard drops, whichever way the
//! guarded scope is left.

use std::{
    cell::RefCell,
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use fs2::FileExt;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use fakedb_core::error::{FakeDbError, FakeDbResult};

struct HeldPaths {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// Lock paths currently held by some thread of this process.
static HELD_PATHS: Lazy<HeldPaths> = Lazy::new(|| HeldPaths {
    held: Mutex::new(HashSet::new()),
    released: Condvar::new(),
});

thread_local! {
    /// Lock paths held by the current thread.
    static HELD_BY_THREAD: RefCell<HashSet<PathBuf>> = RefCell::new(HashSet::new());
}

/// Returns the lock file path for a snapshot path: `<snapshot>.lock`.
pub fn lock_path_for(snapshot: &Path) -> PathBuf {
    let mut name = snapshot.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

// Registry key for a lock file: absolute, with the parent directory canonicalized when it exists.
fn registry_key(lock_path: &Path) -> PathBuf {
    let absolute = std::path::absolute(lock_path).unwrap_or_else(|_| lock_path.to_path_buf());

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

/// This thread's claim on a path in the process-wide registry.
struct InProcessClaim {
    key: PathBuf,
}

impl InProcessClaim {
    /// Waits until no other thread holds `key`. Returns `None` if `deadline` passes first.
    fn acquire(key: PathBuf, deadline: Option<Instant>) -> Option<Self> {
        let mut held = HELD_PATHS.held.lock();

        while held.contains(&key) {
            match deadline {
                Some(deadline) => {
                    if HELD_PATHS.released.wait_until(&mut held, deadline).timed_out() && held.contains(&key) {
                        return None;
                    }
                }
                None => HELD_PATHS.released.wait(&mut held),
            }
        }

        held.insert(key.clone());
        HELD_BY_THREAD.with(|paths| paths.borrow_mut().insert(key.clone()));

        Some(Self { key })
    }
}

impl Drop for InProcessClaim {
    fn drop(&mut self) {
        HELD_BY_THREAD.with(|paths| paths.borrow_mut().remove(&self.key));
        HELD_PATHS.held.lock().remove(&self.key);
        HELD_PATHS.released.notify_all();
    }
}

/// Scoped exclusive lock on a snapshot path.
///
/// # Example
///
/// ```ignore
/// let lock = SnapshotLock::acquire(Path::new("/tmp/app.fakedb"), Some(Duration::from_secs(5)), DEFAULT_POLL_INTERVAL)?;
/// // ... read, modify, write the snapshot ...
/// drop(lock);
/// ```
pub struct SnapshotLock {
    snapshot: PathBuf,
    file: File,
    // Dropped after the file lock is released.
    _claim: InProcessClaim,
}

impl std::fmt::Debug for SnapshotLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotLock")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl SnapshotLock {
    /// Acquires the lock for `snapshot`, waiting at most `timeout` (forever if `None`).
    ///
    /// Fails with [`FakeDbError::Deadlock`] if the calling thread already holds it
    /// and with [`FakeDbError::LockTimeout`] if the wait expires.
    pub fn acquire(snapshot: &Path, timeout: Option<Duration>, poll_interval: Duration) -> FakeDbResult<Self> {
        let started = Instant::now();
        let deadline = timeout.map(|timeout| started + timeout);

        let lock_path = lock_path_for(snapshot);
        if let Some(parent) = lock_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let key = registry_key(&lock_path);

        if HELD_BY_THREAD.with(|paths| paths.borrow().contains(&key)) {
            return Err(FakeDbError::Deadlock(snapshot.to_path_buf()));
        }

        let timed_out = |waited: Duration| {
            warn!(path = %snapshot.display(), waited_ms = waited.as_millis() as u64, "timed out waiting for snapshot lock");
            FakeDbError::LockTimeout(snapshot.to_path_buf(), timeout.unwrap_or(waited))
        };

        let claim = InProcessClaim::acquire(key, deadline).ok_or_else(|| timed_out(started.elapsed()))?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        match deadline {
            None => file.lock_exclusive()?,
            Some(deadline) => loop {
                match file.try_lock_exclusive() {
                    Ok(()) => break,
                    Err(err) if is_contended(&err) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(timed_out(started.elapsed()));
                        }
                        thread::sleep(poll_interval.min(deadline - now));
                    }
                    Err(err) => return Err(err.into()),
                }
            },
        }

        debug!(
            path = %snapshot.display(),
            waited_us = started.elapsed().as_micros() as u64,
            "acquired snapshot lock"
        );

        Ok(Self {
            snapshot: snapshot.to_path_buf(),
            file,
            _claim: claim,
        })
    }

    /// The snapshot path this lock guards.
    pub fn snapshot(&self) -> &Path {
        &self.snapshot
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.snapshot.display(), error = %err, "failed to unlock snapshot lock file");
        }
        debug!(path = %self.snapshot.display(), "released snapshot lock");
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind() || err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn lock_file_sits_next_to_the_snapshot() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/db/app.fakedb")),
            PathBuf::from("/tmp/db/app.fakedb.lock")
        );
    }

    #[test]
    fn reacquiring_on_the_same_thread_is_a_deadlock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.fakedb");

        let _lock = SnapshotLock::acquire(&path, None, Duration::from_millis(5)).unwrap();
        let err = SnapshotLock::acquire(&path, None, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, FakeDbError::Deadlock(ref locked) if locked == &path));

        let other = dir.path().join("other.fakedb");
        assert!(SnapshotLock::acquire(&other, None, Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn dropping_releases_for_the_same_thread() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.fakedb");

        drop(SnapshotLock::acquire(&path, None, Duration::from_millis(5)).unwrap());
        assert!(SnapshotLock::acquire(&path, None, Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn another_thread_times_out_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.fakedb");
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let path = path.clone();
            thread::spawn(move || {
                let _lock = SnapshotLock::acquire(&path, None, Duration::from_millis(5)).unwrap();
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };

        locked_rx.recv().unwrap();
        let err = SnapshotLock::acquire(&path, Some(Duration::from_millis(50)), Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, FakeDbError::LockTimeout(_, waited) if waited == Duration::from_millis(50)));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(SnapshotLock::acquire(&path, Some(Duration::from_secs(5)), Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn foreign_file_lock_is_honoured() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.fakedb");

        // Stands in for another process holding the lock file.
        let foreign = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path_for(&path))
            .unwrap();
        foreign.lock_exclusive().unwrap();

        let err = SnapshotLock::acquire(&path, Some(Duration::from_millis(30)), Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, FakeDbError::LockTimeout(_, _)));

        FileExt::unlock(&foreign).unwrap();
        assert!(SnapshotLock::acquire(&path, Some(Duration::from_secs(5)), Duration::from_millis(5)).is_ok());
    }
}
