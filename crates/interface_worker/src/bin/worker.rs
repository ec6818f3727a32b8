//! Claims Intake - Worker Binary
//!
//! # Usage
//!
//! ```bash
//! # Validate committed ranges until stopped
//! cargo run --bin intake-worker
//!
//! # Stage a JSON array of claim envelopes as one run
//! cargo run --bin intake-worker -- ingest claims.json
//!
//! # Apply acknowledgments from an external system
//! cargo run --bin intake-worker -- ack acks.json
//! ```
//!
//! # Environment Variables
//!
//! * `DATABASE_URL` / `INTAKE_DATABASE_URL` - PostgreSQL connection string
//! * `INTAKE_POLL_INTERVAL_MS` - Pause between validation passes (default: 2000)
//! * `INTAKE_CONSUMER` - Consumer name for range progress (default: promotion)
//! * `INTAKE_WORKER_NAME` - Lease holder name (default: worker-1)
//! * `INTAKE_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! * `INTAKE_JSON_LOGS` - Emit JSON log lines (default: false)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use infra_db::{create_pool, run_migrations};
use interface_worker::{LogPromotionPort, Pipeline, PipelinePorts, WorkerConfig, WorkerLoop};

#[derive(Debug, Parser)]
#[command(name = "intake-worker", about = "Claims intake pipeline worker", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate committed ranges until interrupted
    Run {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Stage a JSON array of claim envelopes
    Ingest { path: PathBuf },
    /// Apply a JSON array of upload acknowledgments
    Ack { path: PathBuf },
    /// Register the standard item types
    Seed,
    /// Report adapter health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("loading configuration")?;
    init_tracing(&config);

    let pool = create_pool(config.database())
        .await
        .context("connecting to database")?;
    run_migrations(&pool).await.context("running migrations")?;

    let promotion = Arc::new(LogPromotionPort::new());
    let ports = PipelinePorts::postgres(pool, promotion.clone());
    let pipeline = Arc::new(Pipeline::new(ports, config.intake(), config.identity()));

    match cli.command.unwrap_or(Command::Run { once: false }) {
        Command::Run { once } => {
            pipeline.seed_item_types().await?;
            let worker = WorkerLoop::new(pipeline, config.poll_interval(), config.stale_after());
            if once {
                let report = worker.tick().await?;
                tracing::info!(
                    released = report.released.len(),
                    ranges = report.validation.ranges.len(),
                    "Single pass finished"
                );
            } else {
                tracing::info!(
                    consumer = %config.consumer,
                    worker = %config.worker_name,
                    "Starting intake worker"
                );
                let ticks = worker.run(shutdown_signal()).await?;
                let (claims, lines) = promotion.totals();
                tracing::info!(ticks, claims, lines, "Worker shutdown complete");
            }
        }
        Command::Ingest { path } => {
            let json = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let summary = pipeline.ingest_json(&json).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Ack { path } => {
            let json = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let outcomes = pipeline.acknowledge_json(&json).await?;
            let applied = outcomes.iter().filter(|o| o.is_applied()).count();
            println!("{applied} of {} acknowledgments applied", outcomes.len());
        }
        Command::Seed => {
            let seeded = pipeline.seed_item_types().await?;
            for item_type in seeded {
                println!("{} {}", item_type.id, item_type.name);
            }
        }
        Command::Health => {
            let results = pipeline.health().await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}

fn init_tracing(config: &WorkerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).init();
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping worker");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping worker");
        }
    }
}
