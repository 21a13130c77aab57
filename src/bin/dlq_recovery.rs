//! # Storyloom Dead-Letter Recovery
//!
//! Standalone recovery worker. By default it consumes the task and result
//! dead-letter queues until interrupted; with `--drain` it empties them once
//! and exits.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use storyloom_core::config::{ConfigLoader, StoryloomConfig};
use storyloom_core::logging::init_structured_logging;
use storyloom_core::messaging::{BatchOutcome, DeliveryHandler, QueueConsumer};
use storyloom_core::orchestration::SystemContext;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "storyloom-dlq-recovery")]
#[command(about = "Move entities whose generation tasks or results were dead-lettered to error")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: $STORYLOOM_CONFIG_DIR or config/storyloom)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment overlay to load (default: $STORYLOOM_ENV)
    #[arg(short, long)]
    environment: Option<String>,

    /// Process what is queued now, then exit
    #[arg(long)]
    drain: bool,
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

async fn drain<H: DeliveryHandler>(consumer: &QueueConsumer<H>) -> anyhow::Result<BatchOutcome> {
    let mut total = BatchOutcome::default();
    loop {
        let batch = consumer.process_batch().await?;
        if batch.total() == 0 {
            return Ok(total);
        }
        total.acked += batch.acked;
        total.retried += batch.retried;
        total.dead_lettered += batch.dead_lettered;
        total.dropped += batch.dropped;
    }
}

fn report_drained(queue: &str, outcome: &BatchOutcome) {
    info!(
        queue,
        recovered = outcome.acked,
        parked = outcome.dead_lettered,
        dropped = outcome.dropped,
        "Dead-letter queue drained"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("failed to load configuration")?;
    init_structured_logging(&config.telemetry);

    let context = SystemContext::from_config(config)
        .await
        .context("failed to bootstrap dead-letter recovery")?;
    let consumers = context.dead_letter_consumers();
    let dead_results = context.result_dead_letter_consumer();

    if cli.drain {
        for consumer in &consumers {
            report_drained(consumer.queue_name(), &drain(consumer).await?);
        }
        report_drained(dead_results.queue_name(), &drain(&dead_results).await?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<_> = consumers
        .into_iter()
        .map(|consumer| {
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { consumer.run(rx).await })
        })
        .collect();
    let rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move { dead_results.run(rx).await }));

    info!(consumers = handles.len(), "🚀 Dead-letter recovery running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    shutdown_tx.send(true).ok();

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Recovery consumer stopped with error"),
            Err(e) => error!(error = %e, "Recovery consumer task panicked"),
        }
    }
    Ok(())
}
