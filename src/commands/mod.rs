pub mod telemetry;

pub use telemetry::{TelemetryCommand, TelemetryReport, run_telemetry_command};
