// SPDX-License-Identifier: MIT OR Apache-2.0
//! `pinflow` - run a persisted dataflow graph.
//!
//! Loads a graph document written by `Graph::dumps`, rebuilds its nodes
//! from the built-in registry, executes it and prints every output pin
//! value as JSON.
//!
//! Usage: `pinflow [OPTIONS] <GRAPH>`
//!
//! Set `RUST_LOG=pinflow_graph=debug` for per-node tracing.

mod error;
mod settings;

use clap::{Parser, ValueEnum};
use error::RunnerError;
use pinflow_graph::{builtin_registry, ExecutionMode, ExecutionReport, Graph, GraphExecutor};
use serde_json::{Map, Value};
use settings::{RunnerSettings, DEFAULT_LOG_FILTER};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Run a persisted pinflow graph.
#[derive(Parser, Debug)]
#[command(name = "pinflow", version)]
struct Args {
    /// Graph document (JSON)
    #[arg(value_name = "GRAPH")]
    graph: Option<PathBuf>,

    /// RON settings file
    #[arg(long, short, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Scheduling mode, overrides the settings file
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Per-node timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Most nodes of one wave running at once
    #[arg(long, value_name = "N")]
    max_concurrency: Option<usize>,

    /// Write default settings to FILE and exit unless a graph is given
    #[arg(long, value_name = "FILE")]
    write_default_settings: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Sequential,
    Parallel,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => Self::Sequential,
            ModeArg::Parallel => Self::Parallel,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let settings = args
        .settings
        .as_deref()
        .map(RunnerSettings::load)
        .transpose();

    let filter = match &settings {
        Ok(Some(settings)) => settings.log_filter.as_str(),
        _ => DEFAULT_LOG_FILTER,
    };
    init_logging(filter);
    tracing::info!("Starting pinflow v{}", env!("CARGO_PKG_VERSION"));

    match run(args, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("pinflow failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(
    args: Args,
    settings: Result<Option<RunnerSettings>, RunnerError>,
) -> Result<(), RunnerError> {
    let mut settings = settings?.unwrap_or_default();

    if let Some(path) = &args.write_default_settings {
        RunnerSettings::default().save(path)?;
        tracing::info!("Wrote default settings to {}", path.display());
        if args.graph.is_none() {
            return Ok(());
        }
    }

    apply_overrides(&args, &mut settings);
    let path = args.graph.ok_or(RunnerError::MissingGraph)?;
    let text = std::fs::read_to_string(&path).map_err(|e| RunnerError::io(&path, e))?;

    let registry = builtin_registry();
    let graph = Graph::loads(&text, &registry)?;
    let executor = GraphExecutor::new(settings.executor);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let report = executor.execute_with_cancel(&graph, cancel).await?;
    let output = render_output(&graph, &report);
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn apply_overrides(args: &Args, settings: &mut RunnerSettings) {
    if let Some(mode) = args.mode {
        settings.executor.mode = mode.into();
    }
    if let Some(ms) = args.timeout_ms {
        settings.executor.node_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(n) = args.max_concurrency {
        settings.executor.max_concurrency = Some(n);
    }
}

/// `{ state, duration_ms, outputs: { node: { pin: value } } }`
fn render_output(graph: &Graph, report: &ExecutionReport) -> Value {
    let mut outputs = Map::new();
    for node in graph.nodes() {
        let node = node.read();
        let pins: Map<String, Value> = node
            .pins()
            .iter()
            .filter(|(_, pin)| pin.is_output())
            .map(|(name, pin)| (name.to_string(), pin.value().clone()))
            .collect();
        if !pins.is_empty() {
            outputs.insert(node.name().to_string(), Value::Object(pins));
        }
    }

    serde_json::json!({
        "graph": graph.name(),
        "state": report.state,
        "duration_ms": u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
        "outputs": outputs,
    })
}
