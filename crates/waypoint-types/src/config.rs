//! Engine configuration types.
//!
//! `EngineConfig` mirrors `waypoint.toml`. Every section and field has a
//! default so a partial (or missing) file still yields a usable config.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which `StateRepository` implementation backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Relational table, one row per run.
    #[default]
    Database,
    /// Key-value cache with repository-maintained secondary indexes.
    Cache,
}

/// Which key-value store the cache backend writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDriver {
    /// Process-local map. Contents vanish on exit.
    Memory,
    /// Key/value table in the SQLite database.
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite URL. Defaults to `{data_dir}/waypoint.db` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Table holding one row per run (database backend).
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// How long terminal runs are retained before the expiry sweep removes them.
    #[serde(default = "default_retention_ttl_secs")]
    pub retention_ttl_secs: u64,
    #[serde(default)]
    pub cache_driver: CacheDriver,
    /// Prefix for every cache key written by the cache backend.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
}

fn default_table_name() -> String {
    "workflow_states".to_string()
}

fn default_retention_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_cache_prefix() -> String {
    "waypoint".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_url: None,
            table_name: default_table_name(),
            retention_ttl_secs: default_retention_ttl_secs(),
            cache_driver: CacheDriver::default(),
            cache_prefix: default_cache_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on node executions within a single execute/resume call.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Per-node wall-clock limit. No limit when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_secs: Option<u64>,
    /// Broadcast channel capacity for lifecycle events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_steps() -> u32 {
    1000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            node_timeout_secs: None,
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}
