//! Workflow state repository trait definition.
//!
//! Defines the persistence contract for `WorkflowState`. The infrastructure
//! layer (waypoint-infra) implements it twice: a relational SQLite table and
//! a key-value cache backend that maintains its own secondary indexes. Both
//! must be observably identical to the executor.

use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;
use waypoint_types::error::RepositoryError;
use waypoint_types::workflow::{WorkflowState, WorkflowStatus};

/// Repository trait for workflow run state.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
///
/// `save` is a last-write-wins upsert, not compare-and-swap. Two executors
/// driving the same `run_id` will overwrite each other; callers that need
/// mutual exclusion wire a `RunLock` into the executor.
pub trait StateRepository: Send + Sync {
    /// Upsert by `run_id`, overwriting every field. Idempotent.
    fn save(
        &self,
        state: &WorkflowState,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a run by ID.
    fn find(
        &self,
        run_id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowState>, RepositoryError>> + Send;

    /// All runs of a workflow definition, most recently written first.
    fn find_by_workflow(
        &self,
        workflow_id: &str,
    ) -> impl Future<Output = Result<Vec<WorkflowState>, RepositoryError>> + Send;

    /// All runs in a status, most recently written first.
    fn find_by_status(
        &self,
        status: WorkflowStatus,
    ) -> impl Future<Output = Result<Vec<WorkflowState>, RepositoryError>> + Send;

    /// Delete a run. Returns `true` if it existed.
    fn delete(
        &self,
        run_id: &Uuid,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Remove terminal runs whose last write is older than the retention
    /// TTL. Returns the number of runs removed.
    fn delete_expired(&self) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}

impl<T: StateRepository> StateRepository for Arc<T> {
    async fn save(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        (**self).save(state).await
    }

    async fn find(&self, run_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
        (**self).find(run_id).await
    }

    async fn find_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        (**self).find_by_workflow(workflow_id).await
    }

    async fn find_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        (**self).find_by_status(status).await
    }

    async fn delete(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        (**self).delete(run_id).await
    }

    async fn delete_expired(&self) -> Result<u64, RepositoryError> {
        (**self).delete_expired().await
    }
}
