use crate::cli::{Cli, Commands};
use crate::commands::run_telemetry_command;
use crate::commands::telemetry::FIRST_USAGE_NOTICE;
use crate::config::{CollectorConfig, MetricsConfigStore};
use crate::telemetry::{
    CollectOptions, Reporter, SessionProps, TerminalStage, set_event_property,
};
use anyhow::{Context, Result, bail};
use serde_json::{Map, json};
use tracing::info;

pub async fn dispatch(cli: Cli) -> Result<()> {
    let store = MetricsConfigStore::open_default()?;

    match cli.command {
        Commands::Telemetry { telemetry_command } => {
            let report = run_telemetry_command(&store, telemetry_command)?;
            println!("{report}");
            Ok(())
        }
        Commands::Run {
            project_name,
            command,
        } => run_session(&store, project_name, command).await,
    }
}

/// Runs `command` as a `c3 session` and drains telemetry before returning.
async fn run_session(
    store: &MetricsConfigStore,
    project_name: Option<String>,
    command: Vec<String>,
) -> Result<()> {
    let reporter = Reporter::from_store(store, &CollectorConfig::from_env());
    if reporter.is_enabled() && reporter.ambient().is_first_usage {
        println!("{FIRST_USAGE_NOTICE}");
        println!();
    }

    let options = CollectOptions {
        started_props: SessionProps {
            args: session_args(project_name.as_deref(), &command),
        },
    };
    let result = reporter
        .collect_async_metrics(options, move || run_command(command))
        .await;

    reporter.wait_for_all_events_settled().await;
    result
}

/// Only the program name and argument count are recorded, never argument
/// values.
fn session_args(project_name: Option<&str>, command: &[String]) -> Map<String, serde_json::Value> {
    let mut args = Map::new();
    if let Some(name) = project_name {
        args.insert("projectName".into(), json!(name));
    }
    if let Some((program, rest)) = command.split_first() {
        args.insert("program".into(), json!(program));
        args.insert("argCount".into(), json!(rest.len()));
    }
    args
}

async fn run_command(command: Vec<String>) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given");
    };

    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to start {program}"))?;

    if let Some(code) = status.code() {
        set_event_property(TerminalStage::Completed, "exitCode", code);
        set_event_property(TerminalStage::Errored, "exitCode", code);
    }

    if status.success() {
        info!(program = %program, "session command finished");
        Ok(())
    } else {
        bail!("{program} exited with {status}")
    }
}
