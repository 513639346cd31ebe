//! Session tracker service.
//!
//! # Architecture Overview
//!
//! ```text
//!     log subscription ──POST /invoke──▶ ┌──────────────────────────────────────┐
//!                                        │  http ─▶ reconcile ─▶ cache client   │──▶ memcached
//!     operators ──GET /users, /nodes───▶ │    │         │             ▲         │    cluster
//!                                        │    ▼         ▼             │         │
//!                                        │ observability      health monitor    │
//!                                        └──────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use session_tracker::config::load_config;
use session_tracker::health::NodeHealthMonitor;
use session_tracker::lifecycle::{build_store, signals, Shutdown};
use session_tracker::observability::{logging, metrics};
use session_tracker::HttpServer;

#[derive(Parser)]
#[command(name = "session-tracker", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SESSION_TRACKER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("session-tracker: {e}");
            std::process::exit(2);
        }
    };

    logging::init(&config.observability.log_level, config.observability.log_format)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "session-tracker starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = ?config.cache.backend,
        endpoint = %config.cache.endpoint(),
        discovery = config.cache.discovery,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = build_store(&config).await?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    let monitor = store
        .memcached
        .clone()
        .map(|client| NodeHealthMonitor::new(client, config.health_check.clone()));
    let monitor_task = monitor.map(|monitor| tokio::spawn(monitor.run(shutdown.subscribe())));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, store.counters, shutdown.subscribe());
    server.run(listener, shutdown.subscribe()).await?;

    if let Some(task) = monitor_task {
        shutdown.trigger();
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
