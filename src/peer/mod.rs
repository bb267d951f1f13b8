//! Peer process: registry of remote peers, liveness, discovery and the RPC
//! surface other processes call

pub mod datagram;
pub mod discovery;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod routes;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::UpdateBus;
use crate::config::{PeerConfig, TimingConfig};
use crate::kv::{StatsClient, StatsStore};
use crate::protocol::{PeerInfo, Update};
use crate::rpc::{Dialer, DirectoryApi};
use crate::util::time::SessionClock;

pub use discovery::Discovery;
pub use handlers::PeerService;
pub use liveness::Liveness;
pub use registry::{PeerRegistry, PeerStatus};

/// Outgoing updates buffered between the bus and the per-peer queues
const ACCEPTED_CAPACITY: usize = 1024;

/// Every component of one peer, wired together
pub struct PeerNode {
    pub info: PeerInfo,
    pub clock: Arc<SessionClock>,
    pub registry: Arc<PeerRegistry>,
    pub bus: Arc<UpdateBus>,
    pub liveness: Arc<Liveness>,
    pub discovery: Arc<Discovery>,
    pub service: Arc<PeerService>,
    pub stats: Arc<StatsClient>,
    accepted: Mutex<Option<mpsc::Receiver<Update>>>,
}

impl PeerNode {
    pub fn new(
        info: PeerInfo,
        config: &PeerConfig,
        timing: &TimingConfig,
        directory: Arc<dyn DirectoryApi>,
        dialer: Arc<dyn Dialer>,
        store: Arc<StatsStore>,
    ) -> Self {
        let peer_id = info.peer_id;
        let clock = Arc::new(SessionClock::new());
        let registry = Arc::new(PeerRegistry::new(peer_id));
        let (bus, accepted) = UpdateBus::new(clock.clone(), config.update_time_delta, ACCEPTED_CAPACITY);
        let bus = Arc::new(bus);

        let liveness = Arc::new(Liveness::new(
            registry.clone(),
            directory.clone(),
            timing.clone(),
            config.gossip_ttl,
        ));
        let discovery = Arc::new(Discovery::new(
            info.clone(),
            registry.clone(),
            directory.clone(),
            dialer.clone(),
            timing.rpc_timeout,
            timing.discovery_interval,
        ));
        let stats = Arc::new(StatsClient::new(peer_id, directory, store.clone()));
        let service = Arc::new(PeerService::new(
            peer_id,
            registry.clone(),
            dialer,
            liveness.clone(),
            bus.clone(),
            config.update_rate_limit,
            store,
            stats.clone(),
        ));

        Self {
            info,
            clock,
            registry,
            bus,
            liveness,
            discovery,
            service,
            stats,
            accepted: Mutex::new(Some(accepted)),
        }
    }

    /// Start discovery, heartbeats, the passive monitor and update fan-out.
    /// Only the first call starts anything.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let Some(accepted) = self.accepted.lock().take() else {
            return Vec::new();
        };

        let discovery = self.discovery.clone();
        let heartbeats = self.liveness.clone();
        let monitor = self.liveness.clone();

        vec![
            tokio::spawn(registry::forward_updates(accepted, self.registry.clone())),
            tokio::spawn(async move { discovery.run().await }),
            tokio::spawn(async move { heartbeats.run_heartbeats().await }),
            tokio::spawn(async move { monitor.run_monitor().await }),
        ]
    }
}
