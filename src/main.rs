//! transpipe - translate a chat dataset
//!
//! # Usage
//!
//! ```bash
//! CONFIG_PATH=config.json transpipe --in data.jsonl --out data.ko.jsonl --src English --dst Korean -w 32
//! ```
//!
//! Records that run out of retries are written to `<out>.failed`. The first
//! Ctrl-C stops reading and drains in-flight records; a second one aborts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transpipe::backend::router::BackendRouter;
use transpipe::chunk::ApproxTokenCounter;
use transpipe::config::Config;
use transpipe::orchestrator::{failure_path, Orchestrator, Settings, DEFAULT_WORKERS};
use transpipe::pipeline::cancel::CancelToken;

/// Translate every message of an NDJSON chat dataset
#[derive(Parser, Debug)]
#[command(name = "transpipe")]
#[command(version)]
struct Cli {
    /// Input dataset (.jsonl)
    #[arg(long = "in", value_name = "PATH")]
    input: PathBuf,

    /// Output dataset; failures go to `<out>.failed`
    #[arg(long = "out", value_name = "PATH")]
    output: PathBuf,

    /// Source language
    #[arg(long)]
    src: String,

    /// Target language
    #[arg(long)]
    dst: String,

    /// Number of translation workers
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Job queue capacity (default: twice the worker count)
    #[arg(long)]
    queue: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("transpipe=info")),
        )
        .init();

    let cli = Cli::parse();

    let (config_path, config) = Config::from_env().context("failed to load configuration")?;
    info!(config = %config_path.display(), backends = config.backends.len(), "configuration loaded");

    let router = Arc::new(BackendRouter::from_config(&config.backends).context("failed to build backends")?);

    let mut settings = Settings::new(&cli.src, &cli.dst)
        .workers(cli.workers)
        .apply_config(&config);
    if let Some(queue) = cli.queue {
        settings = settings.queue_capacity(queue);
    }

    let stop = CancelToken::new();
    let abort = CancelToken::new();
    tokio::spawn(watch_signals(stop.clone(), abort.clone()));

    let orchestrator = Orchestrator::new(settings, router, Arc::new(ApproxTokenCounter::default()));
    let summary = orchestrator
        .run(&cli.input, &cli.output, stop, abort)
        .await
        .with_context(|| format!("translation of {} failed", cli.input.display()))?;

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        last_index_read = ?summary.last_index_read,
        output = %cli.output.display(),
        failures = %failure_path(&cli.output).display(),
        "finished"
    );
    Ok(())
}

/// First signal: stop reading. Second signal: abort in-flight waits.
async fn watch_signals(stop: CancelToken, abort: CancelToken) {
    if let Err(err) = shutdown_signal().await {
        warn!(error = %err, "cannot listen for shutdown signals");
        return;
    }
    info!("received stop signal, draining in-flight records (interrupt again to abort)");
    stop.cancel();

    if shutdown_signal().await.is_ok() {
        warn!("received second stop signal, aborting");
        abort.cancel();
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
