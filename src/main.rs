//! plantops-link daemon.
//!
//! Keeps a resilient link to the plant-operations backend: negotiates the
//! protocol, runs the health monitor and session manager, logs every
//! connectivity event and exports metrics until interrupted.

use clap::Parser;
use std::path::PathBuf;

use plantops_link::config::{load_config, load_from_env};
use plantops_link::lifecycle::shutdown_signal;
use plantops_link::observability::{init_logging, init_metrics};
use plantops_link::ConnectivityService;

#[derive(Parser)]
#[command(name = "plantops-link")]
#[command(about = "Resilient backend connectivity daemon", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults plus PLANTOPS_* variables when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    init_logging(&config.observability);
    tracing::info!("plantops-link v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        host = %config.backend.host,
        max_concurrent = config.throttle.max_concurrent,
        failure_threshold = config.circuit_breaker.failure_threshold,
        auth_required = config.auth.required,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let service = ConnectivityService::from_config(config)?;
    let mut events = service.subscribe();
    let protocol = service.start().await;
    tracing::info!(%protocol, "Link established");

    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(event = event.name(), "Connectivity event");
        }
    });

    shutdown_signal().await?;
    service.stop();
    logger.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
