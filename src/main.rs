#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use c3_telemetry::Cli;
use c3_telemetry::app::dispatch;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// `C3_LOG` selects the log level; warnings only by default.
fn log_level() -> Level {
    std::env::var("C3_LOG")
        .ok()
        .and_then(|level| level.trim().parse().ok())
        .unwrap_or(Level::WARN)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    dispatch(cli).await
}
