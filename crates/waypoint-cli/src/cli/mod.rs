//! CLI command definitions for the `waypoint` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a noun-verb
//! pattern (e.g., `waypoint runs list`, `waypoint runs cancel <id>`).

pub mod runs;
pub mod sweep;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Inspect and maintain durable workflow runs.
#[derive(Parser)]
#[command(name = "waypoint", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding waypoint.toml and the default database.
    #[arg(long, global = true, env = "WAYPOINT_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect, cancel and delete workflow runs.
    Runs {
        #[command(subcommand)]
        action: runs::RunsCommand,
    },

    /// Delete terminal runs older than the retention TTL.
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl+C.
        #[arg(long)]
        watch: bool,
    },

    /// Storage location, backend and run counts.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
