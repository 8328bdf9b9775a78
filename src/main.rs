//! Metric usage registry (v1)
//!
//! Tracks which metrics are consumed by which dashboards and rule groups, and
//! which referenced metrics are broken.
//!
//! # Architecture Overview
//!
//! ```text
//!   Producers (dashboard scanners, rule pushers)
//!        │  POST /api/v1/usage
//!        ▼
//!   ┌─────────┐    ┌──────────────┐    ┌──────────────┐    ┌────────────┐
//!   │  http   │───▶│ ingest queue │───▶│ merge engine │───▶│   store    │
//!   │ server  │    │  (mpsc)      │    │ (one writer) │    │ (ArcSwap)  │
//!   └────┬────┘    └──────────────┘    └──────────────┘    └─────┬──────┘
//!        │  GET /api/v1/metrics                                  │
//!        └──────────────────▶ query surface ◀────────────────────┘
//!
//!   Cross-cutting: config, observability (tracing + Prometheus),
//!   lifecycle (startup, signals, shutdown), snapshot persistence
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use metrics_usage::config::load_config;
use metrics_usage::http::{AppState, HttpServer};
use metrics_usage::lifecycle::{self, signals, Shutdown};
use metrics_usage::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "metrics-usage")]
#[command(about = "Registry of metric usage across dashboards and rules", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    logging::init_logging(&config.observability)?;
    tracing::info!("metrics-usage v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        persistence = config.persistence.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install Prometheus exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = lifecycle::start(&config)?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    signals::spawn_signal_handler(&shutdown);

    let server = HttpServer::new(&config, AppState::new(&services.registry));
    server.run(listener, server_shutdown).await?;

    // Only now can nothing enqueue: drain the registry and persist it.
    services.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
