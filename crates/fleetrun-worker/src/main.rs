//! FleetRun Worker Daemon

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fleetrun_client::http::HttpClient;
use fleetrun_worker::{shutdown, Config, WorkerAgent};

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
    for warning in config.warnings() {
        warn!("{warning}");
    }

    info!(
        control_plane = %config.control_plane,
        hostname = %config.hostname(),
        executor = ?config.executor,
        max_concurrent_tasks = config.max_concurrent_tasks,
        "Starting FleetRun worker"
    );

    let client = HttpClient::new(&config.control_plane);
    let agent = WorkerAgent::new(
        Arc::new(client),
        config.build_executor(),
        config.agent_config(),
    );
    let shutdown = shutdown::install_shutdown_handler();

    // Reconnection loop
    loop {
        match agent.run(shutdown.clone()).await {
            Ok(_) => break,
            Err(e) => {
                error!(error = %e, "Could not join the control plane");
            }
        }

        info!(
            delay_ms = config.reconnect_delay_ms,
            "Reconnecting in {} ms...", config.reconnect_delay_ms
        );
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay()) => {}
        }
    }

    Ok(())
}
