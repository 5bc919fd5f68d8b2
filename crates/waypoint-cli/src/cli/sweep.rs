//! Retention sweep command.

use std::time::Duration;

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use waypoint_core::workflow::ExpirySweeper;

use crate::state::AppState;

/// Run one sweep, or keep sweeping until Ctrl+C with `--watch`.
pub async fn handle_sweep(state: &AppState, watch: bool, json: bool) -> Result<()> {
    let interval = Duration::from_secs(state.config.sweeper.interval_secs);
    let sweeper = ExpirySweeper::new(state.repo.clone(), interval);
    let ttl = state.config.storage.retention_ttl_secs;

    let removed = if watch {
        if !json {
            println!();
            println!(
                "  {} Sweeping every {}s (retention {}s). Press Ctrl+C to stop.",
                style("i").blue().bold(),
                sweeper.interval().as_secs(),
                ttl,
            );
        }

        let shutdown = CancellationToken::new();
        let handle = sweeper.spawn(shutdown.clone());
        tokio::signal::ctrl_c().await?;
        shutdown.cancel();
        handle.await?
    } else {
        sweeper.sweep_once().await?
    };

    if json {
        println!(
            "{}",
            serde_json::json!({"removed": removed, "retention_ttl_secs": ttl})
        );
    } else {
        println!();
        println!(
            "  {} Removed {} expired run{}",
            style("ok").green(),
            style(removed).cyan(),
            if removed == 1 { "" } else { "s" },
        );
        println!();
    }

    Ok(())
}
