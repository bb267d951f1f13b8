//! Directory process

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::directory::{build_router, Directory};
use crate::rpc::HttpDialer;
use crate::util::time::SessionClock;

pub async fn run_directory(config: Config, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let timing = config.timing.clone();

    // The directory never sends updates, so no datagram socket
    let dialer = HttpDialer::new(
        reqwest::Client::new(),
        None,
        timing.rpc_timeout,
        timing.liveness_timeout,
    );
    let directory = Directory::new(
        config.directory.clone(),
        timing.clone(),
        Arc::new(SessionClock::new()),
        Arc::new(dialer),
    );

    let monitor = directory.clone();
    tokio::spawn(async move {
        monitor.run_recovery_monitor().await;
    });

    let router = build_router(directory, timing.rpc_timeout * 3);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("cannot bind directory on {}", config.listen_addr))?;

    info!(
        addr = %config.listen_addr,
        min_peer_connections = config.directory.min_peer_connections,
        replication_factor = config.directory.replication_factor,
        "Directory listening"
    );
    info!("Health check: http://{}/health", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Directory shutdown complete");
    Ok(())
}
