//! Directory polling and outbound peer connections

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::registry::{PeerRegistry, PeerStatus};
use crate::protocol::{PeerId, PeerInfo};
use crate::rpc::{with_timeout, Dialer, DirectoryApi};

pub struct Discovery {
    self_info: PeerInfo,
    registry: Arc<PeerRegistry>,
    directory: Arc<dyn DirectoryApi>,
    dialer: Arc<dyn Dialer>,
    min_connections: AtomicU8,
    call_timeout: Duration,
    interval: Duration,
}

impl Discovery {
    pub fn new(
        self_info: PeerInfo,
        registry: Arc<PeerRegistry>,
        directory: Arc<dyn DirectoryApi>,
        dialer: Arc<dyn Dialer>,
        call_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            self_info,
            registry,
            directory,
            dialer,
            min_connections: AtomicU8::new(0),
            call_timeout,
            interval,
        }
    }

    pub fn set_min_connections(&self, min: u8) {
        self.min_connections.store(min, Ordering::Relaxed);
    }

    /// Poll the directory once. Returns the peers newly connected to.
    pub async fn discover_round(&self) -> Vec<PeerId> {
        let self_id = self.self_info.peer_id;
        let nodes = match with_timeout(self.call_timeout, self.directory.get_nodes(self_id)).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Node discovery failed");
                return Vec::new();
            }
        };

        // A disconnected peer the directory no longer lists has left the session
        let listed: HashSet<PeerId> = nodes.iter().map(|n| n.peer_id).collect();
        for peer_id in self.registry.ids() {
            if !listed.contains(&peer_id)
                && self.registry.status(peer_id) == Some(PeerStatus::Disconnected)
            {
                self.registry.remove(peer_id);
            }
        }

        let min = usize::from(self.min_connections.load(Ordering::Relaxed));
        let mut added = Vec::new();
        for node in nodes {
            if self.registry.connected_count() >= min {
                break;
            }
            if node.peer_id == self_id || self.registry.contains(node.peer_id) {
                continue;
            }
            if self.connect_to(&node).await {
                added.push(node.peer_id);
            }
        }
        added
    }

    /// Dial `node` and introduce ourselves
    async fn connect_to(&self, node: &PeerInfo) -> bool {
        let api = match self.dialer.dial(node) {
            Ok(api) => api,
            Err(e) => {
                warn!(peer_id = node.peer_id, error = %e, "Cannot dial peer");
                return false;
            }
        };

        match with_timeout(self.call_timeout, api.register_peer(&self.self_info)).await {
            Ok(()) => {
                self.registry.insert(node.clone(), api);
                info!(peer_id = node.peer_id, display_name = %node.display_name, "Connected to peer");
                true
            }
            Err(e) => {
                debug!(peer_id = node.peer_id, error = %e, "Peer refused registration");
                false
            }
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.discover_round().await;
        }
    }
}
