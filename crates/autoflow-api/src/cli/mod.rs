//! CLI command definitions for the `autoflow` binary.

pub mod automation;
pub mod execution;
pub mod trigger;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use execution::ExecutionCommand;
use trigger::{ScheduleCommand, WebhookCommand};

/// Run automations: manual runs, cron schedules and webhooks.
#[derive(Parser)]
#[command(name = "autoflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory (database, files, config.toml).
    #[arg(long, global = true, env = "AUTOFLOW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the webhook server, cron scheduler and browser pool.
    Serve {
        /// Port to listen on (overrides config.toml).
        #[arg(long, short)]
        port: Option<u16>,

        /// Host to bind (overrides config.toml).
        #[arg(long)]
        host: Option<String>,
    },

    /// Check an automation definition file without storing it.
    Validate {
        /// Path to the automation JSON file.
        file: PathBuf,
    },

    /// Store an automation definition (replaces an existing one with the same id).
    Import {
        /// Path to the automation JSON file.
        file: PathBuf,
    },

    /// List stored automations.
    #[command(alias = "ls")]
    List,

    /// Execute an automation now.
    Run {
        /// Automation id.
        id: uuid::Uuid,

        /// JSON input handed to the first step.
        #[arg(long)]
        input: Option<String>,
    },

    /// Manage cron schedules.
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommand,
    },

    /// Manage webhook triggers.
    Webhook {
        #[command(subcommand)]
        action: WebhookCommand,
    },

    /// Inspect executions.
    Execution {
        #[command(subcommand)]
        action: ExecutionCommand,
    },
}
