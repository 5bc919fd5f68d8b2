//! Run-level mutual exclusion hook.
//!
//! The repository's `save` is last-write-wins, so two executors driving the
//! same `run_id` silently clobber each other. The executor acquires a
//! `RunLock` around `execute`, `resume` and `cancel`; the default
//! `NoopRunLock` grants everything and leaves exclusion to the caller.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashSet;
use uuid::Uuid;
use waypoint_types::error::RepositoryError;

/// Lock keyed by run id.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition) so that
/// implementations backed by a database or an external lock service fit.
pub trait RunLock: Send + Sync {
    /// Try to take the lock. Returns `false` if another holder has it.
    fn acquire(&self, run_id: &Uuid) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Release a lock taken with `acquire`. Releasing an unheld lock is a no-op.
    fn release(&self, run_id: &Uuid) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Grants every request. Single-writer usage is the caller's responsibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunLock;

impl RunLock for NoopRunLock {
    async fn acquire(&self, _run_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(true)
    }

    async fn release(&self, _run_id: &Uuid) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// In-process lock. Clones share the same set of held run ids, so one
/// instance can be handed to several executors in the same process.
#[derive(Debug, Clone, Default)]
pub struct LocalRunLock {
    held: Arc<DashSet<Uuid>>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, run_id: &Uuid) -> bool {
        self.held.contains(run_id)
    }
}

impl RunLock for LocalRunLock {
    async fn acquire(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.held.insert(*run_id))
    }

    async fn release(&self, run_id: &Uuid) -> Result<(), RepositoryError> {
        self.held.remove(run_id);
        Ok(())
    }
}
