//! Runtime backend selection.
//!
//! `StateRepository` and `CacheStore` use native async fn in traits and are
//! not object safe, so the configured backend is picked through enums that
//! forward every call to the concrete implementation.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;
use waypoint_core::repository::state::StateRepository;
use waypoint_core::storage::cache_store::CacheStore;
use waypoint_types::config::{CacheDriver, StorageBackend, StorageConfig};
use waypoint_types::error::RepositoryError;
use waypoint_types::workflow::{WorkflowState, WorkflowStatus};

use crate::cache::{CacheStateRepository, MemoryCacheStore};
use crate::sqlite::cache::SqliteCacheStore;
use crate::sqlite::pool::{DatabasePool, default_database_url};
use crate::sqlite::state::SqliteStateRepository;

// ---------------------------------------------------------------------------
// AnyCacheStore
// ---------------------------------------------------------------------------

/// One of the bundled cache drivers.
pub enum AnyCacheStore {
    Memory(MemoryCacheStore),
    Sqlite(SqliteCacheStore),
}

impl CacheStore for AnyCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        match self {
            AnyCacheStore::Memory(store) => store.get(key).await,
            AnyCacheStore::Sqlite(store) => store.get(key).await,
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), RepositoryError> {
        match self {
            AnyCacheStore::Memory(store) => store.put(key, value, ttl).await,
            AnyCacheStore::Sqlite(store) => store.put(key, value, ttl).await,
        }
    }

    async fn forget(&self, key: &str) -> Result<bool, RepositoryError> {
        match self {
            AnyCacheStore::Memory(store) => store.forget(key).await,
            AnyCacheStore::Sqlite(store) => store.forget(key).await,
        }
    }
}

// ---------------------------------------------------------------------------
// AnyStateRepository
// ---------------------------------------------------------------------------

/// The configured `StateRepository` backend.
pub enum AnyStateRepository {
    Database(SqliteStateRepository),
    Cache(CacheStateRepository<AnyCacheStore>),
}

impl AnyStateRepository {
    pub fn backend(&self) -> StorageBackend {
        match self {
            AnyStateRepository::Database(_) => StorageBackend::Database,
            AnyStateRepository::Cache(_) => StorageBackend::Cache,
        }
    }
}

impl StateRepository for AnyStateRepository {
    async fn save(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        match self {
            AnyStateRepository::Database(repo) => repo.save(state).await,
            AnyStateRepository::Cache(repo) => repo.save(state).await,
        }
    }

    async fn find(&self, run_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
        match self {
            AnyStateRepository::Database(repo) => repo.find(run_id).await,
            AnyStateRepository::Cache(repo) => repo.find(run_id).await,
        }
    }

    async fn find_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        match self {
            AnyStateRepository::Database(repo) => repo.find_by_workflow(workflow_id).await,
            AnyStateRepository::Cache(repo) => repo.find_by_workflow(workflow_id).await,
        }
    }

    async fn find_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        match self {
            AnyStateRepository::Database(repo) => repo.find_by_status(status).await,
            AnyStateRepository::Cache(repo) => repo.find_by_status(status).await,
        }
    }

    async fn delete(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        match self {
            AnyStateRepository::Database(repo) => repo.delete(run_id).await,
            AnyStateRepository::Cache(repo) => repo.delete(run_id).await,
        }
    }

    async fn delete_expired(&self) -> Result<u64, RepositoryError> {
        match self {
            AnyStateRepository::Database(repo) => repo.delete_expired().await,
            AnyStateRepository::Cache(repo) => repo.delete_expired().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build the repository described by `config`.
///
/// SQLite-backed choices open `database_url`, or `{data_dir}/waypoint.db`
/// when it is unset, and create their tables if needed.
pub async fn build_repository(
    config: &StorageConfig,
    data_dir: &Path,
) -> Result<AnyStateRepository, RepositoryError> {
    let retention_ttl = Duration::from_secs(config.retention_ttl_secs);

    let repo = match (config.backend, config.cache_driver) {
        (StorageBackend::Database, _) => {
            let pool = open_pool(config, data_dir).await?;
            let repo = SqliteStateRepository::new(pool, &config.table_name, retention_ttl)?;
            repo.ensure_schema().await?;
            AnyStateRepository::Database(repo)
        }
        (StorageBackend::Cache, CacheDriver::Memory) => AnyStateRepository::Cache(
            CacheStateRepository::new(
                AnyCacheStore::Memory(MemoryCacheStore::new()),
                config.cache_prefix.as_str(),
                retention_ttl,
            ),
        ),
        (StorageBackend::Cache, CacheDriver::Sqlite) => {
            let store = SqliteCacheStore::new(open_pool(config, data_dir).await?);
            store.ensure_schema().await?;
            AnyStateRepository::Cache(CacheStateRepository::new(
                AnyCacheStore::Sqlite(store),
                config.cache_prefix.as_str(),
                retention_ttl,
            ))
        }
    };

    tracing::info!(
        backend = ?config.backend,
        retention_ttl_secs = config.retention_ttl_secs,
        "workflow state repository ready"
    );
    Ok(repo)
}

async fn open_pool(
    config: &StorageConfig,
    data_dir: &Path,
) -> Result<DatabasePool, RepositoryError> {
    let url = match &config.database_url {
        Some(url) => url.clone(),
        None => {
            tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
                RepositoryError::Connection(format!(
                    "failed to create data directory {}: {e}",
                    data_dir.display()
                ))
            })?;
            default_database_url(data_dir)
        }
    };

    DatabasePool::new(&url)
        .await
        .map_err(|e| RepositoryError::Connection(e.to_string()))
}
