#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod telemetry;

pub use cli::Cli;
pub use commands::{TelemetryCommand, TelemetryReport, run_telemetry_command};
pub use config::{CollectorConfig, MetricsConfigStore, PermissionRecord, PersistedConfig};
pub use error::{C3Error, CancelError, ConfigError, TelemetryError};
pub use telemetry::{
    CollectOptions, PromptProps, Reporter, SessionProps, TerminalStage, set_event_property,
};
