//! spanrelay daemon entry point.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use spanrelay_daemon::DaemonConfig;

/// Local trace ingestion-and-forwarding daemon.
#[derive(Debug, Parser)]
#[command(name = "spanrelayd", version, about)]
struct Cli {
    /// Path to the daemon configuration file (JSON).
    #[arg(long, value_name = "PATH")]
    config: PathBuf,

    /// Log filter in tracing `EnvFilter` syntax. Overrides `RUST_LOG`.
    #[arg(long, value_name = "FILTER")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = cli
        .log_filter
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DaemonConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let orchestrator = config.build().context("building daemon")?;

    orchestrator.start().await.context("starting daemon")?;
    info!(
        control_addr = %orchestrator.control_addr(),
        workers = orchestrator.worker_count(),
        "spanrelayd running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");
    orchestrator.stop();

    Ok(())
}
