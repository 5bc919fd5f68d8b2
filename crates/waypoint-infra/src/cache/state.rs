//! Cache-backed workflow state repository.
//!
//! Each run is one cache key holding the serialized `WorkflowState`. A cache
//! store cannot be queried by field, so this repository maintains its own
//! secondary indexes:
//!
//! ```text
//! {prefix}:state:{run_id}            -> WorkflowState JSON
//! {prefix}:index:workflow:{wf_id}    -> { run_id: { at, workflow_id } }
//! {prefix}:index:status:{status}     -> { run_id: { at, workflow_id } }
//! ```
//!
//! Every `save` and `delete` updates both indexes. Terminal states are stored
//! with the retention TTL, but store expiry only drops the primary key, so
//! `delete_expired` walks the terminal status indexes and removes both the
//! primary key and its index entries. Index entries carry the workflow id so
//! the workflow index can be pruned after the primary key is gone.
//!
//! Index updates are read-modify-write sequences with no lock around them.
//! Two concurrent saves of different runs sharing a workflow or status can
//! lose one index update; the affected run then disappears from list queries
//! until it is saved again.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waypoint_core::repository::state::StateRepository;
use waypoint_core::storage::cache_store::CacheStore;
use waypoint_types::error::RepositoryError;
use waypoint_types::workflow::{WorkflowState, WorkflowStatus};

use crate::timestamp::{format_timestamp, parse_timestamp};

/// One run in a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
    /// Last write timestamp.
    at: String,
    workflow_id: String,
}

/// `run_id -> entry`.
type RunIndex = BTreeMap<String, IndexEntry>;

/// `StateRepository` over any [`CacheStore`].
pub struct CacheStateRepository<C> {
    store: C,
    prefix: String,
    retention_ttl: Duration,
}

impl<C: CacheStore> CacheStateRepository<C> {
    pub fn new(store: C, prefix: impl Into<String>, retention_ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            retention_ttl,
        }
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    fn state_key(&self, run_id: &Uuid) -> String {
        format!("{}:state:{run_id}", self.prefix)
    }

    fn workflow_index_key(&self, workflow_id: &str) -> String {
        format!("{}:index:workflow:{workflow_id}", self.prefix)
    }

    fn status_index_key(&self, status: WorkflowStatus) -> String {
        format!("{}:index:status:{status}", self.prefix)
    }

    // -----------------------------------------------------------------------
    // Index helpers
    // -----------------------------------------------------------------------

    async fn read_index(&self, key: &str) -> Result<RunIndex, RepositoryError> {
        match self.store.get(key).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(RunIndex::new()),
        }
    }

    async fn write_index(&self, key: &str, index: &RunIndex) -> Result<(), RepositoryError> {
        if index.is_empty() {
            self.store.forget(key).await?;
        } else {
            self.store.put(key, &serde_json::to_value(index)?, None).await?;
        }
        Ok(())
    }

    async fn index_insert(
        &self,
        key: &str,
        run_id: &str,
        entry: &IndexEntry,
    ) -> Result<(), RepositoryError> {
        let mut index = self.read_index(key).await?;
        index.insert(run_id.to_string(), entry.clone());
        self.write_index(key, &index).await
    }

    /// Remove a run from an index, returning the entry it held.
    async fn index_remove(
        &self,
        key: &str,
        run_id: &str,
    ) -> Result<Option<IndexEntry>, RepositoryError> {
        let mut index = self.read_index(key).await?;
        let removed = index.remove(run_id);
        if removed.is_some() {
            self.write_index(key, &index).await?;
        }
        Ok(removed)
    }

    /// Load the runs of an index, newest write first, skipping entries whose
    /// primary key is gone or no longer matches.
    async fn load_indexed(
        &self,
        key: &str,
        matches: impl Fn(&WorkflowState) -> bool,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        let index = self.read_index(key).await?;
        let mut entries: Vec<(String, IndexEntry)> = index.into_iter().collect();
        entries.sort_by(|(id_a, a), (id_b, b)| b.at.cmp(&a.at).then_with(|| id_b.cmp(id_a)));

        let mut states = Vec::with_capacity(entries.len());
        for (run_id, _) in entries {
            let Ok(id) = Uuid::parse_str(&run_id) else {
                tracing::warn!(index = key, run_id = %run_id, "malformed run id in cache index");
                continue;
            };
            match self.find(&id).await? {
                Some(state) if matches(&state) => states.push(state),
                Some(_) => {
                    tracing::warn!(index = key, run_id = %run_id, "stale cache index entry");
                }
                None => {
                    tracing::warn!(index = key, run_id = %run_id, "dangling cache index entry");
                }
            }
        }
        Ok(states)
    }

    /// Save with an explicit last-write timestamp.
    pub(crate) async fn save_at(
        &self,
        state: &WorkflowState,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let run_id = state.run_id.to_string();
        let entry = IndexEntry {
            at: format_timestamp(&at),
            workflow_id: state.workflow_id.clone(),
        };
        let ttl = state.is_terminal().then_some(self.retention_ttl);

        self.store
            .put(&self.state_key(&state.run_id), &serde_json::to_value(state)?, ttl)
            .await?;

        self.index_insert(&self.workflow_index_key(&state.workflow_id), &run_id, &entry)
            .await?;
        self.index_insert(&self.status_index_key(state.status), &run_id, &entry)
            .await?;
        for status in WorkflowStatus::ALL.into_iter().filter(|s| *s != state.status) {
            self.index_remove(&self.status_index_key(status), &run_id).await?;
        }
        Ok(())
    }
}

impl<C: CacheStore> StateRepository for CacheStateRepository<C> {
    async fn save(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        self.save_at(state, Utc::now()).await
    }

    async fn find(&self, run_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
        match self.store.get(&self.state_key(run_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn find_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        self.load_indexed(&self.workflow_index_key(workflow_id), |state| {
            state.workflow_id == workflow_id
        })
        .await
    }

    async fn find_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        self.load_indexed(&self.status_index_key(status), |state| state.status == status)
            .await
    }

    async fn delete(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let mut workflow_id = self.find(run_id).await?.map(|state| state.workflow_id);
        let removed = self.store.forget(&self.state_key(run_id)).await?;

        // The status entry still names the workflow when the primary has expired.
        let id = run_id.to_string();
        for status in WorkflowStatus::ALL {
            if let Some(entry) = self.index_remove(&self.status_index_key(status), &id).await? {
                workflow_id.get_or_insert(entry.workflow_id);
            }
        }
        if let Some(workflow_id) = workflow_id {
            self.index_remove(&self.workflow_index_key(&workflow_id), &id)
                .await?;
        }

        Ok(removed)
    }

    async fn delete_expired(&self) -> Result<u64, RepositoryError> {
        let ttl = chrono::Duration::from_std(self.retention_ttl)
            .map_err(|e| RepositoryError::Query(format!("invalid retention ttl: {e}")))?;
        let cutoff = Utc::now() - ttl;
        let mut removed = 0u64;

        for status in WorkflowStatus::TERMINAL {
            let key = self.status_index_key(status);
            let mut index = self.read_index(&key).await?;
            let mut expired = Vec::new();

            for (run_id, entry) in &index {
                let stale = match parse_timestamp(&entry.at) {
                    Ok(at) => at < cutoff,
                    Err(e) => {
                        tracing::warn!(
                            index = %key,
                            run_id = %run_id,
                            error = %e,
                            "unreadable index timestamp"
                        );
                        true
                    }
                };
                if stale {
                    expired.push((run_id.clone(), entry.workflow_id.clone()));
                }
            }

            for (run_id, workflow_id) in &expired {
                index.remove(run_id);
                self.index_remove(&self.workflow_index_key(workflow_id), run_id)
                    .await?;
                let Ok(id) = Uuid::parse_str(run_id) else {
                    continue;
                };
                // The store may already have dropped the primary key via TTL.
                self.store.forget(&self.state_key(&id)).await?;
                removed += 1;
            }

            if !expired.is_empty() {
                self.write_index(&key, &index).await?;
            }
        }

        if removed > 0 {
            tracing::info!(prefix = %self.prefix, removed, "deleted expired workflow states");
        }
        Ok(removed)
    }
}
