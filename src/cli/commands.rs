use crate::commands::TelemetryCommand;
use clap::{Parser, Subcommand};

/// `c3` - create-cloudflare sessions with lifecycle telemetry.
#[derive(Parser, Debug)]
#[command(name = "c3")]
#[command(version)]
#[command(about = "Run instrumented sessions and manage anonymous telemetry.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage anonymous telemetry collection
    Telemetry {
        #[command(subcommand)]
        telemetry_command: TelemetryCommand,
    },

    /// Run a command as an instrumented session
    Run {
        /// Project name recorded with the session
        #[arg(long)]
        project_name: Option<String>,

        /// Program and arguments to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}
