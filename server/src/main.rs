use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use docshift::config::{LogFormat, LoggingConfig};
use docshift::{load_from_env, AppState, ServerConfig, Sweeper};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_from_env().context("Failed to load configuration")?;
    install_subscriber(&config.logging)?;

    info!("Starting docshift server v{}", env!("CARGO_PKG_VERSION"));
    run(config).await
}

async fn run(config: ServerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.scratch_directory)
        .await
        .with_context(|| {
            format!(
                "Failed to create scratch directory {}",
                config.scratch_directory.display()
            )
        })?;
    info!(
        scratch = %config.scratch_directory.display(),
        concurrency = config.concurrency,
        "Scratch storage ready"
    );

    let sweeper = Sweeper::new(
        &config.scratch_directory,
        config.cleanup.interval(),
        config.cleanup.retention(),
    );
    let sweeper_handle = sweeper.start();

    let state = Arc::new(AppState::new(config));
    let served = docshift::serve(state, shutdown_signal()).await;

    sweeper.stop();
    if let Err(e) = sweeper_handle.await {
        warn!("Sweeper task ended abnormally: {}", e);
    }

    served.context("HTTP server failed")?;
    info!("Server stopped");
    Ok(())
}

fn install_subscriber(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init(),
    }
    .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}
