//! Shipwright daemon
//!
//! Runs the orchestration service against the in-process bus and stores:
//! subscribes to agent results, sweeps task timeouts, and stops cleanly on
//! Ctrl-C or SIGTERM.

use anyhow::Context;
use clap::Parser;
use shipwright_orchestrator::{OrchestrationService, OrchestratorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shipwright daemon CLI
#[derive(Parser)]
#[command(name = "shipwrightd")]
#[command(about = "Shipwright - message-driven delivery orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SHIPWRIGHT_CONFIG")]
    config: Option<String>,

    /// Log level; overrides `logging.level`
    #[arg(long, env = "SHIPWRIGHT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "SHIPWRIGHT_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = OrchestratorConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.service.source,
        results_group = %config.service.results_group,
        "Starting shipwright daemon"
    );

    let service = OrchestrationService::in_memory(config);
    service
        .start()
        .await
        .context("failed to start orchestration service")?;
    service.spawn_sweeper();

    shutdown_signal().await?;

    service.shutdown().await;
    tracing::info!("Shipwright daemon stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                tracing::info!("Received Ctrl-C, initiating graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received terminate signal, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for Ctrl-C")?;
        tracing::info!("Received Ctrl-C, initiating graceful shutdown");
    }

    Ok(())
}
