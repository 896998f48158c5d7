//! Storage backend abstraction for database state.
//!
//! A [`StorageBackend`] owns the authoritative copy of one database instance and
//! runs read-modify-write cycles against it under mutual exclusion. The
//! in-process backend keeps the state in memory; the local backend keeps it in a
//! snapshot file shared between processes.
//!
//! # Read-modify-write
//!
//! [`StorageBackend::with_lock`] hands the operation a mutable state and expects
//! back a result plus a [`Persist`] decision:
//!
//! ```ignore
//! let count = backend.with_lock(|db: &mut FakeDocumentDb| {
//!     let removed = db.delete_many("events", Some(&filter))?;
//!     Ok((removed, Persist::when(removed > 0)))
//! })?;
//! ```
//!
//! The lock is released on every exit path: normal return, an error from the
//! operation, or a panic unwinding through it.

use std::{fmt::Debug, sync::Arc};

use crate::{error::FakeDbResult, snapshot::Snapshot};

/// Whether a lock-guarded operation changed the state and needs it written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    Save,
    Skip,
}

impl Persist {
    /// `Save` when `changed`, otherwise `Skip`.
    pub fn when(changed: bool) -> Self {
        if changed { Persist::Save } else { Persist::Skip }
    }
}

/// Abstract interface for database state storage.
///
/// # Thread Safety
///
/// Implementations are `Send + Sync`; concurrent `with_lock` calls against the
/// same storage location are serialized.
///
/// # Reentrancy
///
/// Calling `with_lock` again from inside an operation on the same storage fails
/// with [`FakeDbError::Deadlock`](crate::error::FakeDbError::Deadlock) instead of
/// blocking forever.
pub trait StorageBackend<S: Snapshot>: Send + Sync + Debug {
    /// Returns the current state, or a fresh empty state if none was persisted yet.
    ///
    /// Does not take the lock; the result may be stale but is never partially written.
    fn load(&self) -> FakeDbResult<S>;

    /// Replaces the persisted state with `state`.
    fn save(&self, state: &S) -> FakeDbResult<()>;

    /// Runs `op` against the freshly loaded state while holding the lock, saving
    /// the state afterwards when `op` returns [`Persist::Save`].
    ///
    /// If `op` fails nothing is saved and the error is returned.
    fn with_lock<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&mut S) -> FakeDbResult<(R, Persist)>;

    /// Runs a read-only `op` against the current state while holding the lock.
    ///
    /// Same locking and reentry rules as [`with_lock`](StorageBackend::with_lock);
    /// nothing is ever saved.
    fn with_read<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&S) -> FakeDbResult<R>,
    {
        self.with_lock(|state| Ok((op(state)?, Persist::Skip)))
    }

    /// Discards all persisted state.
    fn reset(&self) -> FakeDbResult<()>;
}

impl<S, B> StorageBackend<S> for &B
where
    S: Snapshot,
    B: StorageBackend<S>,
{
    fn load(&self) -> FakeDbResult<S> {
        (*self).load()
    }

    fn save(&self, state: &S) -> FakeDbResult<()> {
        (*self).save(state)
    }

    fn with_lock<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&mut S) -> FakeDbResult<(R, Persist)>,
    {
        (*self).with_lock(op)
    }

    fn with_read<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&S) -> FakeDbResult<R>,
    {
        (*self).with_read(op)
    }

    fn reset(&self) -> FakeDbResult<()> {
        (*self).reset()
    }
}

impl<S, B> StorageBackend<S> for Arc<B>
where
    S: Snapshot,
    B: StorageBackend<S>,
{
    fn load(&self) -> FakeDbResult<S> {
        (**self).load()
    }

    fn save(&self, state: &S) -> FakeDbResult<()> {
        (**self).save(state)
    }

    fn with_lock<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&mut S) -> FakeDbResult<(R, Persist)>,
    {
        (**self).with_lock(op)
    }

    fn with_read<R, F>(&self, op: F) -> FakeDbResult<R>
    where
        F: FnOnce(&S) -> FakeDbResult<R>,
    {
        (**self).with_read(op)
    }

    fn reset(&self) -> FakeDbResult<()> {
        (**self).reset()
    }
}
