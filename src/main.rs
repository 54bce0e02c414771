//! tagflux binary entry point.
//!
//! Loads configuration, connects the storage backend, starts the
//! collection pipeline, and serves the status API until a termination
//! signal stops everything gracefully.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tagflux::collect::{Collector, CollectorOptions};
use tagflux::config::AppConfig;
use tagflux::device::DriverRegistry;
use tagflux::device::sim::{SimBank, register_simulator};
use tagflux::server::{AppState, create_router};
use tagflux::storage::StorageBackend;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between retention purge runs.
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// tagflux - Industrial Tag Data Collector
#[derive(Parser, Debug)]
#[command(name = "tagflux", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "TAGFLUX_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "TAGFLUX_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "TAGFLUX_SERVER_PORT")]
    server_port: Option<u16>,

    /// Storage DSN (overrides config file)
    #[arg(long, env = "TAGFLUX_DB_URL")]
    db_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tagflux=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tagflux - Industrial Tag Data Collector");

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(dsn) = cli.db_url {
        config.storage.dsn = dsn;
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}, Storage: {} ({} devices configured)",
        config.server.bind,
        config.server.port,
        config.storage.engine,
        config.devices.len(),
    );

    // Connect storage
    let backend =
        tagflux::storage::connect(config.storage.engine, &config.storage.expanded_dsn()).await?;

    // Driver registry: the simulator family ships built in; real protocol
    // drivers are registered by embedders.
    let mut registry = DriverRegistry::new();
    register_simulator(&mut registry, SimBank::new());

    // Build and start the collection pipeline
    let collector = Arc::new(Collector::new(
        config.devices.clone(),
        Arc::new(registry),
        Some(Arc::clone(&backend)),
        CollectorOptions {
            queue_capacity: config.storage.queue_capacity,
            write_interval: config.storage.write_interval,
            error_backoff: config.storage.error_backoff,
        },
    ));
    collector.start().await?;

    // Periodic retention purge, when configured
    let purge_cancel = CancellationToken::new();
    if let Some(days) = config.storage.retention_days {
        spawn_retention_task(Arc::clone(&backend), days, purge_cancel.clone());
    }

    // Status API
    let app = create_router(AppState {
        backend,
        collector: Arc::clone(&collector),
    });
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Status API listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(collector, purge_cancel))
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Purge historical rows older than `days` on a fixed cadence.
fn spawn_retention_task(
    backend: Arc<dyn StorageBackend>,
    days: u32,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match backend.purge_historical(days).await {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::info!(deleted, days, "Retention purge removed old records");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Retention purge failed");
                }
            }
        }
    });
}

/// Wait for a termination signal, then stop the pipeline.
async fn shutdown_signal(collector: Arc<Collector>, purge_cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    purge_cancel.cancel();

    tracing::info!("Stopping collection...");
    collector.shutdown().await;
}
