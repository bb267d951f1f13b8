//! Peer process

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{info, warn};

use crate::config::Config;
use crate::kv::StatsStore;
use crate::peer::{datagram, routes, PeerNode};
use crate::protocol::{ConnectRequest, PeerId, PeerInfo, Rejection};
use crate::rpc::{DirectoryApi, HttpDialer, HttpDirectoryClient, RpcError};

pub async fn run_peer(config: Config, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let peer_config = config
        .peer
        .clone()
        .context("peer role started without peer settings")?;
    let timing = config.timing.clone();
    let client = reqwest::Client::new();

    let directory: Arc<dyn DirectoryApi> = Arc::new(HttpDirectoryClient::new(
        client.clone(),
        &peer_config.directory_url,
        timing.rpc_timeout,
    ));

    // Identity first: no session exists without the directory
    let id_path = id_file(&peer_config.id_dir, &peer_config.display_name);
    let (peer_id, fresh) = load_or_generate_id(&id_path)?;
    let settings = match directory.register(&peer_config.display_name, peer_id).await {
        Ok(settings) => settings,
        Err(RpcError::Rejected(Rejection::DisplayNameInUse { display_name })) => {
            bail!("display name {:?} is already taken, pick another", display_name)
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("cannot register with directory at {}", peer_config.directory_url)
            })
        }
    };
    if fresh {
        store_id(&id_path, peer_id)?;
    }
    info!(peer_id, display_name = %settings.display_name, "Registered with directory");

    let socket = Arc::new(
        UdpSocket::bind(peer_config.datagram_addr)
            .await
            .with_context(|| format!("cannot bind datagram socket on {}", peer_config.datagram_addr))?,
    );
    let dialer = Arc::new(HttpDialer::new(
        client,
        Some(socket.clone()),
        timing.rpc_timeout,
        timing.liveness_timeout,
    ));

    let store = Arc::new(
        StatsStore::open(&peer_config.stats_dir)
            .with_context(|| format!("cannot open stats directory {}", peer_config.stats_dir.display()))?,
    );

    let info = PeerInfo {
        peer_id,
        display_name: settings.display_name.clone(),
        address: advertised_datagram_addr(&peer_config.advertise_addr, peer_config.datagram_addr),
        rpc_address: peer_config.advertise_addr.clone(),
    };
    let node = PeerNode::new(
        info.clone(),
        &peer_config,
        &timing,
        directory.clone(),
        dialer,
        store.clone(),
    );
    node.discovery.set_min_connections(settings.min_peer_connections);

    // Serve before connecting: the directory calls back for clock sync
    let router = routes::build_router(node.service.clone(), timing.rpc_timeout * 2);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("cannot bind peer RPC on {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, datagram = %peer_config.datagram_addr, "Peer listening");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    let reply = directory
        .connect(ConnectRequest {
            peer: info,
            held_keys: store.keys(),
        })
        .await
        .context("directory refused connection")?;
    info!(min_peer_connections = reply.min_peer_connections, "Joined session");
    node.discovery.set_min_connections(reply.min_peer_connections);

    let mut workers = node.spawn_workers();
    workers.push(tokio::spawn(datagram::run_listener(socket, node.service.clone())));
    if peer_config.bot {
        workers.push(tokio::spawn(crate::game::bot::run(
            peer_id,
            node.service.clone(),
            node.bus.clone(),
        )));
    }

    shutdown.await;

    for worker in &workers {
        worker.abort();
    }
    if let Err(e) = directory.disconnect(peer_id).await {
        warn!(error = %e, "Could not leave the session cleanly");
    }
    let _ = stop_tx.send(());
    server.await??;

    info!(peer_id, "Peer shutdown complete");
    Ok(())
}

fn id_file(dir: &Path, display_name: &str) -> PathBuf {
    dir.join(format!("{}.ID", display_name))
}

/// Reuse the id persisted for this name, or pick a fresh random one.
/// The flag is true when the id still has to be written.
fn load_or_generate_id(path: &Path) -> anyhow::Result<(PeerId, bool)> {
    match std::fs::read_to_string(path) {
        Ok(body) => {
            let id = body
                .trim()
                .parse()
                .with_context(|| format!("malformed id file {}", path.display()))?;
            Ok((id, false))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok((rand::random(), true)),
        Err(e) => Err(e).with_context(|| format!("cannot read id file {}", path.display())),
    }
}

fn store_id(path: &Path, peer_id: PeerId) -> anyhow::Result<()> {
    std::fs::write(path, format!("{}\n", peer_id))
        .with_context(|| format!("cannot write id file {}", path.display()))
}

/// Where other peers should send datagrams: the advertised RPC host with the
/// datagram port
fn advertised_datagram_addr(advertise_addr: &str, datagram_addr: SocketAddr) -> String {
    if !datagram_addr.ip().is_unspecified() {
        return datagram_addr.to_string();
    }
    let host = advertise_addr
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(advertise_addr);
    format!("{}:{}", host, datagram_addr.port())
}
