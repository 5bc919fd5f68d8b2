//! Application state shared by CLI commands.
//!
//! Opens the configured storage backend once per invocation.

use std::path::PathBuf;
use std::sync::Arc;

use waypoint_core::event::EventBus;
use waypoint_core::workflow::Executor;
use waypoint_infra::repository::{AnyStateRepository, build_repository};
use anyhow::bail;
use waypoint_types::config::{CacheDriver, EngineConfig, StorageBackend, StorageConfig};

/// Executor pinned to the runtime-selected repository.
pub type ConcreteExecutor = Executor<Arc<AnyStateRepository>>;

pub struct AppState {
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub repo: Arc<AnyStateRepository>,
    pub executor: ConcreteExecutor,
}

impl AppState {
    /// Connect to the storage backend described by `config`.
    pub async fn init(data_dir: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        check_persistent(&config.storage)?;
        let repo = Arc::new(build_repository(&config.storage, &data_dir).await?);
        let executor = Executor::new(repo.clone(), EventBus::new(config.executor.event_capacity))
            .with_config(&config.executor);

        Ok(Self {
            config,
            data_dir,
            repo,
            executor,
        })
    }
}

/// Reject storage that does not outlive the process. Every CLI invocation
/// would start from an empty store.
fn check_persistent(storage: &StorageConfig) -> anyhow::Result<()> {
    if storage.backend == StorageBackend::Cache && storage.cache_driver == CacheDriver::Memory {
        bail!(
            "cache_driver = \"memory\" keeps runs only inside the engine process; \
             set cache_driver = \"sqlite\" or backend = \"database\" to inspect runs from the CLI"
        );
    }
    Ok(())
}
