//! metricd Binary Entry Point
//!
//! Runs the plaintext ingest listener, the stats endpoint and, when a
//! Graphite host is configured, the telemetry reporter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use metricd::{
    config::{AppConfig, LoggingConfig, parse_duration},
    ingest::IngestListener,
    metrics::{BUILD_VERSION, IngestMetrics},
    policy::PolicyStore,
    server::{AppState, create_router},
    storage::{StorageOrchestrator, WhisperBackend},
    telemetry::GraphiteReporter,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log file name inside `--log-dir`.
const LOG_FILE_NAME: &str = "metricd.log";

/// metricd - plaintext metric ingestion daemon
#[derive(Parser, Debug)]
#[command(name = "metricd", version, about, long_about = None)]
struct Cli {
    /// Path to an optional YAML configuration file
    #[arg(short, long, env = "METRICD_CONFIG")]
    config: Option<PathBuf>,

    /// Ingest bind address (overrides config file)
    #[arg(long, env = "METRICD_BIND")]
    bind: Option<String>,

    /// Ingest port (overrides config file)
    #[arg(short, long, env = "METRICD_PORT")]
    port: Option<u16>,

    /// Stats endpoint port (overrides config file)
    #[arg(long, env = "METRICD_REPORT_PORT")]
    report_port: Option<u16>,

    /// Whisper storage root (overrides config file)
    #[arg(short, long = "whisper-dir", env = "METRICD_WHISPER_DIR")]
    whisper_dir: Option<PathBuf>,

    /// Storage schema file (overrides config file)
    #[arg(long, env = "METRICD_SCHEMA_FILE")]
    schema_file: Option<PathBuf>,

    /// Storage aggregation file (overrides config file)
    #[arg(long = "aggr-file", env = "METRICD_AGGR_FILE")]
    aggr_file: Option<PathBuf>,

    /// Runtime worker threads (default: 80% of CPUs)
    #[arg(long)]
    max_procs: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Write a daily-rolling log file into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Also log to stdout when --log-dir is set
    #[arg(long)]
    stdout: bool,

    /// Telemetry reporting interval, e.g. `60s`
    #[arg(long, value_parser = parse_duration)]
    telemetry_interval: Option<Duration>,
}

impl Cli {
    /// Build the effective configuration (CLI > ENV > config file > defaults).
    fn into_config(self) -> Result<AppConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.ingest.bind = bind;
        }
        if let Some(port) = self.port {
            config.ingest.port = port;
        }
        if let Some(port) = self.report_port {
            config.stats.port = port;
        }
        if let Some(root) = self.whisper_dir {
            config.storage.root = root;
        }
        if let Some(path) = self.schema_file {
            config.policy.schema_file = path;
        }
        if let Some(path) = self.aggr_file {
            config.policy.aggregation_file = Some(path);
        }
        if let Some(threads) = self.max_procs {
            config.runtime.worker_threads = threads;
        }
        match self.verbose {
            0 => {}
            1 => config.logging.level = "debug".to_string(),
            _ => config.logging.level = "trace".to_string(),
        }
        if let Some(dir) = self.log_dir {
            config.logging.dir = Some(dir);
        }
        if self.stdout {
            config.logging.stdout = true;
        }
        if let Some(interval) = self.telemetry_interval {
            config.telemetry.interval = interval;
        }
        config.telemetry.apply_env();

        config.normalize();
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _guard = init_tracing(&config.logging)?;

    tracing::info!(version = BUILD_VERSION, "metricd - plaintext metric ingestion");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>, std::io::Error> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("info,metricd={}", logging.level).into());

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer =
        (logging.dir.is_none() || logging.stdout).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(guard)
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Ingest: {}, Stats: {}, Storage: {}, Workers: {}",
        config.ingest.address(),
        config.stats.address(),
        config.storage.root.display(),
        config.runtime.worker_threads,
    );

    // Policies are loaded once; any unreadable file is fatal.
    let policies = PolicyStore::load(
        &config.policy.schema_file,
        config.policy.aggregation_file.as_deref(),
    )?;
    tracing::info!(
        schema_file = %config.policy.schema_file.display(),
        schemas = policies.schemas().len(),
        aggregations = policies.aggregations().len(),
        "Loaded storage policies"
    );

    let metrics = Arc::new(IngestMetrics::new());
    let orchestrator = Arc::new(StorageOrchestrator::new(
        WhisperBackend::new(),
        config.storage.root.clone(),
        Arc::new(policies),
        Arc::clone(&metrics),
    ));

    let ingest = IngestListener::bind(&config.ingest.address(), orchestrator).await?;

    let stats_addr = config.stats.address();
    let stats_listener = tokio::net::TcpListener::bind(&stats_addr).await?;
    tracing::info!("Stats endpoint listening on: http://{}", stats_addr);

    match &config.telemetry.graphite_host {
        Some(host) => {
            let reporter = GraphiteReporter::new(
                host.clone(),
                config.telemetry.interval,
                config.telemetry.timeout,
                Arc::clone(&metrics),
            );
            tokio::spawn(reporter.run());
        }
        None => tracing::debug!("No graphite host configured, telemetry disabled"),
    }

    let app = create_router(AppState::new(metrics));

    tracing::info!("Press Ctrl+C to shutdown");

    tokio::select! {
        _ = ingest.run() => {}
        result = axum::serve(stats_listener, app).with_graceful_shutdown(shutdown_signal()) => {
            result?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
