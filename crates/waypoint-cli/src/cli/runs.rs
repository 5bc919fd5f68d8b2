//! CLI run management subcommands.
//!
//! Provides list, show, cancel and delete operations on persisted workflow
//! runs. Starting and resuming runs needs the node logic of a workflow
//! definition and is left to the embedding application.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use waypoint_core::repository::StateRepository;
use waypoint_core::workflow::{CancelOutcome, ExecutorError};
use waypoint_types::workflow::{WorkflowState, WorkflowStatus};

use crate::state::AppState;

/// Run management subcommands.
#[derive(Subcommand)]
pub enum RunsCommand {
    /// List runs, newest first.
    #[command(alias = "ls")]
    List {
        /// Only runs of this workflow definition.
        #[arg(long)]
        workflow: Option<String>,

        /// Only runs in this status (running, paused, completed, failed, cancelled).
        #[arg(long)]
        status: Option<WorkflowStatus>,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one run with its node history.
    Show {
        /// Run UUID.
        run_id: String,
    },

    /// Cancel a running or paused run.
    Cancel {
        /// Run UUID.
        run_id: String,
    },

    /// Delete a run permanently.
    #[command(alias = "rm")]
    Delete {
        /// Run UUID.
        run_id: String,
    },
}

/// Handle a runs subcommand.
pub async fn handle_runs_command(cmd: RunsCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        RunsCommand::List {
            workflow,
            status,
            limit,
        } => handle_list(state, workflow.as_deref(), status, limit, json).await,
        RunsCommand::Show { run_id } => handle_show(state, &run_id, json).await,
        RunsCommand::Cancel { run_id } => handle_cancel(state, &run_id, json).await,
        RunsCommand::Delete { run_id } => handle_delete(state, &run_id, json).await,
    }
}

fn parse_run_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("Invalid run ID: '{raw}'"))
}

fn short_id(run_id: &Uuid) -> String {
    run_id.to_string().chars().take(8).collect()
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(
    state: &AppState,
    workflow: Option<&str>,
    status: Option<WorkflowStatus>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let mut runs = match (workflow, status) {
        (Some(workflow_id), status) => {
            let runs = state.repo.find_by_workflow(workflow_id).await?;
            match status {
                Some(status) => runs.into_iter().filter(|r| r.status == status).collect(),
                None => runs,
            }
        }
        (None, Some(status)) => state.repo.find_by_status(status).await?,
        (None, None) => {
            let mut all = Vec::new();
            for status in WorkflowStatus::ALL {
                all.extend(state.repo.find_by_status(status).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.run_id.cmp(&a.run_id)));
            all
        }
    };
    runs.truncate(limit);

    if json {
        let out: Vec<_> = runs.iter().map(run_summary).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  {} No matching runs.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Node"),
            Cell::new("Steps"),
            Cell::new("Started"),
        ]);

    for r in &runs {
        let started = r
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(short_id(&r.run_id)),
            Cell::new(&r.workflow_id),
            format_status(r.status),
            Cell::new(r.current_node.as_deref().unwrap_or("-")),
            Cell::new(r.history.len()),
            Cell::new(started),
        ]);
    }

    println!();
    println!("  Workflow runs ({} shown)", runs.len());
    println!();
    println!("{table}");
    println!();

    Ok(())
}

fn run_summary(r: &WorkflowState) -> serde_json::Value {
    serde_json::json!({
        "run_id": r.run_id.to_string(),
        "workflow_id": r.workflow_id,
        "status": r.status,
        "current_node": r.current_node,
        "steps": r.history.len(),
        "pause_reason": r.pause_reason,
        "started_at": r.started_at.map(|t| t.to_rfc3339()),
        "completed_at": r.completed_at.map(|t| t.to_rfc3339()),
        "error": r.last_error(),
    })
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn handle_show(state: &AppState, raw_id: &str, json: bool) -> Result<()> {
    let run_id = parse_run_id(raw_id)?;
    let Some(run) = state.repo.find(&run_id).await? else {
        bail!("Run '{raw_id}' not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Run {}",
        style("Workflow:").bold(),
        style(run.run_id).cyan()
    );
    println!("  Workflow: {}", style(&run.workflow_id).cyan());
    println!("  Status: {}", run.status);
    if let Some(node) = &run.current_node {
        println!("  Current node: {node}");
    }
    if let Some(reason) = &run.pause_reason {
        println!("  Paused: {}", style(reason).magenta());
    }
    if let Some(started) = run.started_at {
        println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = run.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(err) = run.last_error() {
        println!("  Error: {}", style(err).red());
    }
    if !run.data.is_empty() {
        println!("  Data: {}", serde_json::to_string(&run.data)?);
    }
    println!();

    if run.history.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Node"),
            Cell::new("Result"),
            Cell::new("Duration"),
            Cell::new("At"),
            Cell::new("Error"),
        ]);

    for (i, entry) in run.history.iter().enumerate() {
        let result = if entry.succeeded {
            Cell::new("ok").fg(Color::Green)
        } else {
            Cell::new("failed").fg(Color::Red)
        };
        let error = entry
            .error_message
            .as_ref()
            .map(|e| e.chars().take(40).collect::<String>())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&entry.node_id),
            result,
            Cell::new(format!("{:.3}s", entry.duration)),
            Cell::new(entry.timestamp.format("%H:%M:%S").to_string()),
            Cell::new(error),
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

async fn handle_cancel(state: &AppState, raw_id: &str, json: bool) -> Result<()> {
    let run_id = parse_run_id(raw_id)?;

    let cancelled = match state.executor.cancel(run_id).await {
        Ok(CancelOutcome::Cancelled(run)) => run,
        // Runs are never active inside this short-lived process.
        Ok(CancelOutcome::Requested) => bail!("Run '{raw_id}' is executing in this process"),
        Err(ExecutorError::RunNotFound(_)) => bail!("Run '{raw_id}' not found"),
        Err(ExecutorError::AlreadyTerminal { status, .. }) => {
            bail!("Run '{raw_id}' already finished with status '{status}'")
        }
        Err(e) => return Err(e).context("Failed to cancel run"),
    };

    if json {
        let out = serde_json::json!({
            "cancelled": cancelled.run_id.to_string(),
            "status": cancelled.status,
        });
        println!("{out}");
    } else {
        println!();
        println!(
            "  {} Cancelled run {} of '{}'",
            style("ok").green(),
            style(short_id(&cancelled.run_id)).cyan(),
            style(&cancelled.workflow_id).cyan(),
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(state: &AppState, raw_id: &str, json: bool) -> Result<()> {
    let run_id = parse_run_id(raw_id)?;

    if !state.repo.delete(&run_id).await? {
        bail!("Run '{raw_id}' not found");
    }

    if json {
        println!("{}", serde_json::json!({"deleted": run_id.to_string()}));
    } else {
        println!();
        println!(
            "  {} Deleted run {}",
            style("ok").green(),
            style(short_id(&run_id)).cyan()
        );
        println!();
    }

    Ok(())
}

fn format_status(status: WorkflowStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        WorkflowStatus::Running => cell.fg(Color::Blue),
        WorkflowStatus::Paused => cell.fg(Color::Magenta),
        WorkflowStatus::Completed => cell.fg(Color::Green),
        WorkflowStatus::Failed => cell.fg(Color::Red),
        WorkflowStatus::Cancelled => cell.fg(Color::DarkYellow),
    }
}
