//! Engine configuration loader for waypoint.
//!
//! Reads `waypoint.toml` from the data directory (`~/.waypoint/` unless
//! `WAYPOINT_DATA_DIR` is set) and deserializes it into [`EngineConfig`].
//! Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use waypoint_types::config::EngineConfig;

/// Configuration file name inside the data directory.
pub const CONFIG_FILE: &str = "waypoint.toml";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "WAYPOINT_DATA_DIR";

/// Resolve the data directory: `$WAYPOINT_DATA_DIR`, else `~/.waypoint`.
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".waypoint"),
    }
}

/// Parse a TOML document into an [`EngineConfig`]. Missing sections and
/// keys take their defaults.
pub fn parse_engine_config(content: &str) -> anyhow::Result<EngineConfig> {
    toml::from_str(content).context("invalid waypoint configuration")
}

/// Load configuration from `{data_dir}/waypoint.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match parse_engine_config(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err:#}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}
