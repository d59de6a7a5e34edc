//! FleetRun Control Plane Server

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fleetrun_control_plane::{
    http, shutdown, AppState, Config, FileBackend, MemoryBackend, StorageBackend, TracingSink,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load config
    let config = Config::parse();
    let addr: SocketAddr = config.bind_addr.parse()?;
    for warning in config.warnings() {
        warn!("{warning}");
    }

    let backend: Arc<dyn StorageBackend> = match &config.data_dir {
        Some(dir) => {
            info!(data_dir = %dir.display(), "Persisting jobs to disk");
            Arc::new(FileBackend::open(dir).await?)
        }
        None => {
            warn!("No data directory configured, jobs will not survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };

    // Create shared state
    let resolver = AppState::resolver_for(&config);
    let state = AppState::new(config, backend, resolver, Arc::new(TracingSink));
    state.coordinator.restore().await?;

    let shutdown = shutdown::install_shutdown_handler();

    // Start liveness monitor
    let liveness = tokio::spawn(state.liveness_monitor().run(shutdown.clone()));

    // Start HTTP server
    let router = http::create_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Starting FleetRun control plane");

    let token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    shutdown.cancel();
    liveness.await?;
    info!("Control plane stopped");

    Ok(())
}
