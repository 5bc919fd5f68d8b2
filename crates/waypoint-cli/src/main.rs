//! waypoint operator CLI entry point.
//!
//! Binary name: `waypoint`
//!
//! Parses CLI arguments, loads configuration, initializes tracing and the
//! storage backend, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use console::style;

use cli::{Cli, Commands};
use state::AppState;
use waypoint_core::repository::StateRepository;
use waypoint_infra::config::{load_engine_config, resolve_data_dir};
use waypoint_types::workflow::WorkflowStatus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config, logging or storage
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "waypoint", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let config = load_engine_config(&data_dir).await;

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,waypoint=debug",
        _ => "trace",
    };
    waypoint_observe::tracing_setup::init_tracing(&config.logging, filter)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init(data_dir, config).await?;
    tracing::debug!(
        data_dir = %state.data_dir.display(),
        backend = ?state.repo.backend(),
        "storage ready"
    );

    let result = match cli.command {
        Commands::Runs { action } => cli::runs::handle_runs_command(action, &state, cli.json).await,
        Commands::Sweep { watch } => cli::sweep::handle_sweep(&state, watch, cli.json).await,
        Commands::Status => status(&state, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    waypoint_observe::tracing_setup::shutdown_tracing();
    result
}

/// Print storage location, backend and run counts per status.
async fn status(state: &AppState, json: bool) -> anyhow::Result<()> {
    let mut counts = Vec::with_capacity(WorkflowStatus::ALL.len());
    for status in WorkflowStatus::ALL {
        counts.push((status, state.repo.find_by_status(status).await?.len()));
    }

    if json {
        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, n)| (status.to_string(), serde_json::json!(n)))
            .collect();
        let out = serde_json::json!({
            "data_dir": state.data_dir.display().to_string(),
            "backend": state.config.storage.backend,
            "retention_ttl_secs": state.config.storage.retention_ttl_secs,
            "runs": by_status,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("waypoint status").bold());
    println!("  Data dir: {}", style(state.data_dir.display()).cyan());
    println!("  Backend: {:?}", state.repo.backend());
    println!(
        "  Retention: {}s",
        state.config.storage.retention_ttl_secs
    );
    println!();
    for (status, n) in counts {
        println!("  {:<10} {}", status.as_str(), style(n).cyan());
    }
    println!();

    Ok(())
}
