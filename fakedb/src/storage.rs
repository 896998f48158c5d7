//! Runtime choice between the in-memory and snapshot-file backends.

use std::fmt;

use fakedb_core::{
    backend::{Persist, StorageBackend},
    error::FakeDbResult,
    snapshot::Snapshot,
};
use fakedb_local::LocalStorage;
use fakedb_memory::MemoryStorage;

/// The backend selected by [`DatabaseOptions`](crate::options::DatabaseOptions):
/// in-memory when no path is configured, a local snapshot file otherwise.
pub enum Storage<S: Snapshot> {
    Memory(MemoryStorage<S>),
    Local(LocalStorage),
}

impl<S: Snapshot> Storage<S> {
    /// Returns `true` when the state lives in a snapshot file.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Storage::Local(_))
    }
}

impl<S: Snapshot> Clone for Storage<S> {
    fn clone(&self) -> Self {
        match self {
            Storage::Memory(storage) => Storage::Memory(storage.clone()),
            Storage::Local(storage) => Storage::Local(storage.clone()),
        }
    }
}

impl<S: Snapshot> fmt::Debug for Storage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Memory(storage) => f.debug_tuple("Memory").field(storage).finish(),
            Storage::Local(storage) => f.debug_tuple("Local").field(storage).finish(),
        }
    }
}

impl<S: Snapshot> StorageBackend<S> for Storage<S> {
    fn load(&self) -> FakeDbResult<S> {
        match self {
            Storage::Memory(storage) => storage.load(),
            Storage::Local(storage) => storage.load(),
        }
    }

    fn save(&self, state: &S) -> FakeDbResult<()> {
        match self {
            Storage::Memory(storage) => storage.save(state),
            Storage::Local(storage) => storage.save(state),
        }
    }

    fn with_lock<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&mut S) -> FakeDbResult<(R, Persist)>,
    {
        match self {
            Storage::Memory(storage) => storage.with_lock(op),
            Storage::Local(storage) => storage.with_lock(op),
        }
    }

    fn with_read<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&S) -> FakeDbResult<R>,
    {
        match self {
            Storage::Memory(storage) => storage.with_read(op),
            Storage::Local(storage) => storage.with_read(op),
        }
    }

    fn reset(&self) -> FakeDbResult<()> {
        match self {
            Storage::Memory(storage) => storage.reset(),
            Storage::Local(storage) => StorageBackend::<S>::reset(storage),
        }
    }
}
