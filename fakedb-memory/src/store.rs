//! Process-local storage backend.
//!
//! [`MemoryStorage`] keeps one database state behind a mutex. It honours the
//! same contract as the file-backed backend (serialized read-modify-write,
//! save-on-request, reentry detection, bounded waits) without touching disk.

use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
    thread::{self, ThreadId},
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use fakedb_core::{
    backend::{Persist, StorageBackend},
    error::{FakeDbError, FakeDbResult},
    snapshot::Snapshot,
};

/// Location reported in lock errors raised by [`MemoryStorage`].
pub const MEMORY_LOCATION: &str = ":memory:";

struct Shared<S> {
    state: Mutex<S>,
    holder: Mutex<Option<ThreadId>>,
}

/// Thread-safe in-memory state storage.
///
/// Clones share the same state, so a clone handed to another thread observes
/// every committed operation.
///
/// # Example
///
/// ```ignore
/// use fakedb_memory::{FakeDocumentDb, MemoryStorage};
/// use fakedb_core::backend::{Persist, StorageBackend};
///
/// let storage = MemoryStorage::<FakeDocumentDb>::new();
/// let id = storage.with_lock(|db| Ok((db.insert_one("events", doc! { "n": 1 })?, Persist::Save)))?;
/// ```
pub struct MemoryStorage<S: Snapshot> {
    shared: Arc<Shared<S>>,
    lock_timeout: Option<Duration>,
}

impl<S: Snapshot> MemoryStorage<S> {
    /// Creates a storage holding an empty state.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryStorageBuilder<S> {
        MemoryStorageBuilder::default()
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    fn location() -> PathBuf {
        PathBuf::from(MEMORY_LOCATION)
    }

    fn check_reentry(&self) -> FakeDbResult<()> {
        if *self.shared.holder.lock() == Some(thread::current().id()) {
            return Err(FakeDbError::Deadlock(Self::location()));
        }

        Ok(())
    }

    fn acquire(&self) -> FakeDbResult<MutexGuard<'_, S>> {
        self.check_reentry()?;

        match self.lock_timeout {
            Some(timeout) => self
                .shared
                .state
                .try_lock_for(timeout)
                .ok_or_else(|| FakeDbError::LockTimeout(Self::location(), timeout)),
            None => Ok(self.shared.state.lock()),
        }
    }
}

impl<S: Snapshot> Default for MemoryStorage<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Snapshot> Clone for MemoryStorage<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<S: Snapshot> fmt::Debug for MemoryStorage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("kind", &S::KIND)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

/// Clears the holder marker when a lock-guarded operation ends, including by panic.
struct HolderGuard<'a> {
    holder: &'a Mutex<Option<ThreadId>>,
}

impl<'a> HolderGuard<'a> {
    fn enter(holder: &'a Mutex<Option<ThreadId>>) -> Self {
        *holder.lock() = Some(thread::current().id());
        Self { holder }
    }
}

impl Drop for HolderGuard<'_> {
    fn drop(&mut self) {
        *self.holder.lock() = None;
    }
}

impl<S: Snapshot> StorageBackend<S> for MemoryStorage<S> {
    fn load(&self) -> FakeDbResult<S> {
        Ok(self.acquire()?.clone())
    }

    fn save(&self, state: &S) -> FakeDbResult<()> {
        *self.acquire()? = state.clone();
        Ok(())
    }

    /// Runs `op` on a working copy; the copy replaces the stored state only on
    /// success with [`Persist::Save`].
    ///
    /// Every call clones the whole state. Read-only callers should use
    /// [`with_read`](StorageBackend::with_read), which does not.
    fn with_lock<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&mut S) -> FakeDbResult<(R, Persist)>,
    {
        let mut state = self.acquire()?;
        let _holder = HolderGuard::enter(&self.shared.holder);

        let mut working = state.clone();
        let (result, persist) = op(&mut working)?;

        if persist == Persist::Save {
            *state = working;
        }

        Ok(result)
    }

    fn with_read<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&S) -> FakeDbResult<R>,
    {
        let state = self.acquire()?;
        let _holder = HolderGuard::enter(&self.shared.holder);

        op(&*state)
    }

    fn reset(&self) -> FakeDbResult<()> {
        *self.acquire()? = S::default();
        debug!(kind = S::KIND, "reset in-memory state");
        Ok(())
    }
}

/// Builder for [`MemoryStorage`].
pub struct MemoryStorageBuilder<S: Snapshot> {
    state: Option<S>,
    lock_timeout: Option<Duration>,
}

impl<S: Snapshot> Default for MemoryStorageBuilder<S> {
    fn default() -> Self {
        Self {
            state: None,
            lock_timeout: None,
        }
    }
}

impl<S: Snapshot> MemoryStorageBuilder<S> {
    /// Starts from `state` instead of an empty state.
    pub fn state(mut self, state: S) -> Self {
        self.state = Some(state);
        self
    }

    /// Maximum wait for the lock before failing with [`FakeDbError::LockTimeout`].
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> MemoryStorage<S> {
        MemoryStorage {
            shared: Arc::new(Shared {
                state: Mutex::new(self.state.unwrap_or_default()),
                holder: Mutex::new(None),
            }),
            lock_timeout: self.lock_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::{
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
        mpsc,
    };

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    impl Snapshot for Counter {
        const KIND: &'static str = "counter";
    }

    fn increment(storage: &MemoryStorage<Counter>) -> FakeDbResult<i64> {
        storage.with_lock(|counter| {
            counter.value += 1;
            Ok((counter.value, Persist::Save))
        })
    }

    #[test]
    fn save_skip_and_failure() {
        let storage = MemoryStorage::builder().state(Counter { value: 10 }).build();

        assert_eq!(increment(&storage).unwrap(), 11);

        storage
            .with_lock(|counter| {
                counter.value = 100;
                Ok(((), Persist::Skip))
            })
            .unwrap();
        assert_eq!(storage.load().unwrap().value, 11);

        let err = storage
            .with_lock(|counter| {
                counter.value = 100;
                Err::<((), Persist), _>(FakeDbError::InvalidArgument("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, FakeDbError::InvalidArgument(_)));
        assert_eq!(storage.load().unwrap().value, 11);
    }

    #[test]
    fn nested_use_is_a_deadlock_error() {
        let storage = MemoryStorage::<Counter>::new();

        let err = storage
            .with_lock(|_| Ok((increment(&storage), Persist::Skip)))
            .unwrap();
        assert!(matches!(err, Err(FakeDbError::Deadlock(_))));

        let err = storage.with_lock(|_| Ok((storage.load(), Persist::Skip))).unwrap();
        assert!(matches!(err, Err(FakeDbError::Deadlock(_))));

        assert_eq!(increment(&storage).unwrap(), 1);
    }

    #[test]
    fn waiting_past_the_timeout_fails() {
        let storage = MemoryStorage::<Counter>::builder()
            .lock_timeout(Duration::from_millis(50))
            .build();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let storage = storage.clone();
            thread::spawn(move || {
                storage
                    .with_lock(|_| {
                        locked_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(((), Persist::Skip))
                    })
                    .unwrap();
            })
        };

        locked_rx.recv().unwrap();
        assert!(matches!(increment(&storage), Err(FakeDbError::LockTimeout(_, _))));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert_eq!(increment(&storage).unwrap(), 1);
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        let storage = MemoryStorage::builder().state(Counter { value: 10 }).build();

        let handles = (0..8)
            .map(|_| {
                let storage = storage.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        increment(&storage).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.load().unwrap().value, 210);
    }

    static TRACKED_CLONES: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Tracked {
        value: i64,
    }

    impl Clone for Tracked {
        fn clone(&self) -> Self {
            TRACKED_CLONES.fetch_add(1, AtomicOrdering::SeqCst);
            Self { value: self.value }
        }
    }

    impl Snapshot for Tracked {
        const KIND: &'static str = "tracked";
    }

    #[test]
    fn reads_do_not_copy_the_state() {
        let storage = MemoryStorage::builder().state(Tracked { value: 4 }).build();
        let clones = TRACKED_CLONES.load(AtomicOrdering::SeqCst);

        assert_eq!(storage.with_read(|tracked| Ok(tracked.value)).unwrap(), 4);
        assert_eq!(TRACKED_CLONES.load(AtomicOrdering::SeqCst), clones);

        storage
            .with_lock(|tracked| {
                tracked.value = 5;
                Ok(((), Persist::Save))
            })
            .unwrap();
        assert_eq!(TRACKED_CLONES.load(AtomicOrdering::SeqCst), clones + 1);
        assert_eq!(storage.with_read(|tracked| Ok(tracked.value)).unwrap(), 5);
    }

    #[test]
    fn nested_read_is_a_deadlock_error() {
        let storage = MemoryStorage::<Counter>::new();

        let nested = storage
            .with_read(|_| Ok(storage.with_read(|counter| Ok(counter.value))))
            .unwrap();
        assert!(matches!(nested, Err(FakeDbError::Deadlock(_))));
        assert!(matches!(
            storage.with_lock(|_| Ok((storage.with_read(|_| Ok(())), Persist::Skip))).unwrap(),
            Err(FakeDbError::Deadlock(_))
        ));
    }

    #[test]
    fn reset_restores_the_empty_state() {
        let storage = MemoryStorage::builder().state(Counter { value: 3 }).build();
        storage.reset().unwrap();

        assert_eq!(storage.load().unwrap(), Counter::default());
    }

    #[test]
    fn panicking_operation_releases_the_lock() {
        let storage = MemoryStorage::<Counter>::new();
        let cloned = storage.clone();

        let outcome = thread::spawn(move || {
            cloned.with_lock(|_| -> FakeDbResult<((), Persist)> { panic!("operation failed") })
        })
        .join();

        assert!(outcome.is_err());
        assert_eq!(increment(&storage).unwrap(), 1);
    }
}
