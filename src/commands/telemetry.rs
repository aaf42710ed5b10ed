use crate::config::{MetricsConfigStore, telemetry_disabled_by_env};
use crate::error::ConfigError;
use clap::Subcommand;
use std::fmt;

pub const ENABLED_NOTE: &str =
    "c3 telemetry is completely anonymous. Thank you for helping us improve the experience!";
pub const DISABLED_NOTE: &str = "c3 is no longer collecting telemetry.";
pub const FIRST_USAGE_NOTICE: &str = "c3 collects anonymous telemetry about how it is used. \
     Run `c3 telemetry disable` to opt out.";

/// Permission actions exposed to the command line.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryCommand {
    /// Show whether telemetry is collected
    Status,
    /// Allow anonymous telemetry
    Enable,
    /// Stop collecting telemetry
    Disable,
}

/// Human-readable outcome of a telemetry command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryReport {
    pub status_line: String,
    pub note: Option<String>,
}

impl TelemetryReport {
    fn new(enabled: bool, note: Option<&str>) -> Self {
        let status = if enabled { "Enabled" } else { "Disabled" };
        Self {
            status_line: format!("Status: {status}"),
            note: note.map(ToOwned::to_owned),
        }
    }
}

impl fmt::Display for TelemetryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_line)?;
        if let Some(note) = &self.note {
            write!(f, "\n\n{note}")?;
        }
        Ok(())
    }
}

/// Applies `command` to the stored permission. `status` never writes.
pub fn run_telemetry_command(
    store: &MetricsConfigStore,
    command: TelemetryCommand,
) -> Result<TelemetryReport, ConfigError> {
    match command {
        TelemetryCommand::Status => {
            let enabled = store
                .read()
                .permission
                .is_none_or(|permission| permission.enabled);
            let mut report = TelemetryReport::new(enabled && !telemetry_disabled_by_env(), None);
            if enabled && telemetry_disabled_by_env() {
                report.status_line.push_str(" (C3_TELEMETRY_DISABLED is set)");
            }
            Ok(report)
        }
        TelemetryCommand::Enable => {
            store.set_permission(true)?;
            Ok(TelemetryReport::new(true, Some(ENABLED_NOTE)))
        }
        TelemetryCommand::Disable => {
            store.set_permission(false)?;
            Ok(TelemetryReport::new(false, Some(DISABLED_NOTE)))
        }
    }
}
