use std::path::PathBuf;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for the telemetry crate.
///
/// Library callers can match on these to decide recovery strategy; the
/// binary and wrapped operations continue to use `anyhow::Result` for ad-hoc
/// context chains.
#[derive(Debug, Error)]
pub enum C3Error {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Telemetry ───────────────────────────────────────────────────────
    #[error("telemetry: {0}")]
    Telemetry(#[from] TelemetryError),

    // ── Cancellation ────────────────────────────────────────────────────
    #[error(transparent)]
    Cancelled(#[from] CancelError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the user configuration directory")]
    NoConfigDir,

    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ─── Telemetry errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("delivery to {endpoint} failed: {message}")]
    Delivery { endpoint: String, message: String },

    #[error("no instrumented operation is active on this task")]
    NoActiveOperation,
}

// ─── Cancellation marker ─────────────────────────────────────────────────────

/// Distinguished failure meaning "the user cancelled this operation".
///
/// Operations return it (wrapped in `anyhow::Error`) to report a deliberate
/// cancellation; the reporter builds one itself when an interrupt signal wins
/// the race, carrying the signal name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", cancel_message(.signal.as_deref()))]
pub struct CancelError {
    pub signal: Option<String>,
}

impl CancelError {
    pub fn new() -> Self {
        Self { signal: None }
    }

    pub fn from_signal(signal: impl Into<String>) -> Self {
        Self {
            signal: Some(signal.into()),
        }
    }
}

fn cancel_message(signal: Option<&str>) -> String {
    match signal {
        Some(signal) => format!("operation cancelled ({signal})"),
        None => "operation cancelled".to_string(),
    }
}

/// Whether an `anyhow` chain carries the cancellation marker.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CancelError>().is_some()
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, C3Error>;
