//! Tank Mesh - coordination core for peer-to-peer multiplayer sessions
//!
//! One binary, two roles selected by `NODE_ROLE`:
//! - `directory`: rendezvous server tracking peer identity and status,
//!   coordinating clock sync and placing stats replicas
//! - `peer`: session participant with its own registry of remote peers,
//!   heartbeat/gossip failure detection and an update bus

mod app;
mod bus;
mod config;
mod directory;
mod game;
mod kv;
mod peer;
mod protocol;
mod rpc;
mod util;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Role};
use crate::util::time::init_process_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize uptime tracking
    init_process_time();

    info!(role = ?config.role, "Starting Tank Mesh");

    match config.role {
        Role::Directory => app::run_directory(config, shutdown_signal()).await,
        Role::Peer => app::run_peer(config, shutdown_signal()).await,
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
