//! # Storyloom Orchestrator
//!
//! Runs the result consumer and the dead-letter recovery consumers until
//! interrupted.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use storyloom_core::config::{ConfigLoader, StoryloomConfig};
use storyloom_core::logging::init_structured_logging;
use storyloom_core::orchestration::SystemContext;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "storyloom-orchestrator")]
#[command(about = "Apply generation results and recover dead-lettered tasks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: $STORYLOOM_CONFIG_DIR or config/storyloom)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment overlay to load (default: $STORYLOOM_ENV)
    #[arg(short, long)]
    environment: Option<String>,

    /// Run over the in-memory store and broker
    #[arg(long)]
    in_memory: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<StoryloomConfig> {
    let config = match &cli.config_dir {
        Some(dir) => {
            let environment = cli.environment.clone().unwrap_or_else(ConfigLoader::detect_environment);
            ConfigLoader::load_from_directory_with_env(dir, &environment)?
        }
        None => ConfigLoader::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("failed to load configuration")?;
    init_structured_logging(&config.telemetry);

    let context = if cli.in_memory {
        SystemContext::in_memory(config).await
    } else {
        SystemContext::from_config(config).await
    }
    .context("failed to bootstrap orchestration system")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    let results = context.result_consumer();
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move { results.run(rx).await }));

    for consumer in context.dead_letter_consumers() {
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { consumer.run(rx).await }));
    }

    let dead_results = context.result_dead_letter_consumer();
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move { dead_results.run(rx).await }));

    info!(consumers = handles.len(), "🚀 Storyloom orchestrator running; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested");
    shutdown_tx.send(true).ok();

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Consumer stopped with error"),
            Err(e) => error!(error = %e, "Consumer task panicked"),
        }
    }

    info!("✅ Storyloom orchestrator stopped");
    Ok(())
}
