//! Rendezvous directory - identity, connection status, discovery, clock sync
//! and stats replica placement

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock_sync::{run_round, RoundOutcome};
use super::connection::{ConnectionEvent, ConnectionRecord, ConnectionStatus};
use crate::config::{DirectoryConfig, TimingConfig};
use crate::kv::ReplicaIndex;
use crate::protocol::{
    ConnectReply, ConnectRequest, KvGetReply, KvPutReply, PeerId, PeerInfo, PeerNetSettings,
    Rejection, StatKey, Stats,
};
use crate::rpc::{with_timeout, Dialer, DirectoryApi, PeerApi, RpcError};
use crate::util::time::SessionClock;

#[derive(Default)]
struct ConnectionTable {
    records: HashMap<PeerId, ConnectionRecord>,
    /// Reserved display names
    names: HashMap<String, PeerId>,
}

impl ConnectionTable {
    fn record_mut(&mut self, peer_id: PeerId) -> Result<&mut ConnectionRecord, Rejection> {
        self.records
            .get_mut(&peer_id)
            .ok_or(Rejection::InvalidClient { peer_id })
    }

    fn handles_where(
        &self,
        keep: impl Fn(ConnectionStatus) -> bool,
    ) -> Vec<(PeerId, Arc<dyn PeerApi>)> {
        let mut handles: Vec<_> = self
            .records
            .values()
            .filter(|r| keep(r.status))
            .filter_map(|r| r.handle.clone().map(|h| (r.peer_id(), h)))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    fn online_ids(&self) -> HashSet<PeerId> {
        self.records
            .values()
            .filter(|r| r.status.is_online())
            .map(|r| r.peer_id())
            .collect()
    }
}

/// Per-status counts for the health endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectorySummary {
    pub registered: usize,
    pub not_in_game: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub reconnected: usize,
    pub tracked_keys: usize,
}

/// The directory service
///
/// The connection table sits behind one reader/writer lock. No RPC is ever
/// made while that lock is held: clock sync, recovery probes and replica
/// calls snapshot the handles they need and write results back afterwards.
pub struct Directory {
    this: Weak<Directory>,
    config: DirectoryConfig,
    timing: TimingConfig,
    clock: Arc<SessionClock>,
    dialer: Arc<dyn Dialer>,
    table: RwLock<ConnectionTable>,
    replicas: ReplicaIndex,
    /// Serialises clock-sync rounds against each other
    sync_round: tokio::sync::Mutex<()>,
}

impl Directory {
    pub fn new(
        config: DirectoryConfig,
        timing: TimingConfig,
        clock: Arc<SessionClock>,
        dialer: Arc<dyn Dialer>,
    ) -> Arc<Self> {
        let replicas = ReplicaIndex::new(config.replication_factor, timing.rpc_timeout);
        Self::with_replicas(config, timing, clock, dialer, replicas)
    }

    pub fn with_replicas(
        config: DirectoryConfig,
        timing: TimingConfig,
        clock: Arc<SessionClock>,
        dialer: Arc<dyn Dialer>,
        replicas: ReplicaIndex,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            timing,
            clock,
            dialer,
            table: RwLock::new(ConnectionTable::default()),
            replicas,
            sync_round: tokio::sync::Mutex::new(()),
        })
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    // ------------------------------------------------------------------------
    // Session membership
    // ------------------------------------------------------------------------

    /// Reserve `display_name` for `peer_id`. Registering the same pair again
    /// succeeds, so a peer restarting with its persisted id can rejoin.
    pub fn register(&self, display_name: &str, peer_id: PeerId) -> Result<PeerNetSettings, Rejection> {
        let mut table = self.table.write();

        match table.names.get(display_name) {
            Some(owner) if *owner == peer_id => {
                debug!(peer_id, display_name, "Repeated registration");
                return Ok(self.settings(peer_id, display_name));
            }
            Some(_) => {
                info!(peer_id, display_name, "Display name already taken");
                return Err(Rejection::DisplayNameInUse {
                    display_name: display_name.to_string(),
                });
            }
            None => {}
        }

        if table.records.contains_key(&peer_id) {
            return Err(Rejection::PeerIdInUse { peer_id });
        }

        table.names.insert(display_name.to_string(), peer_id);
        table
            .records
            .insert(peer_id, ConnectionRecord::registered(peer_id, display_name));

        info!(peer_id, display_name, "Peer registered");
        Ok(self.settings(peer_id, display_name))
    }

    fn settings(&self, peer_id: PeerId, display_name: &str) -> PeerNetSettings {
        PeerNetSettings {
            peer_id,
            display_name: display_name.to_string(),
            min_peer_connections: self.config.min_peer_connections,
        }
    }

    /// Join the session. Triggers a clock-sync round in the background.
    pub fn connect(&self, request: ConnectRequest) -> Result<ConnectReply, Rejection> {
        let peer_id = request.peer.peer_id;

        // Dialing only builds a client; nothing goes on the wire yet
        let handle = match self.dialer.dial(&request.peer) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(peer_id, error = %e, "Cannot dial connecting peer, clock sync and probes will skip it");
                None
            }
        };

        {
            let mut table = self.table.write();
            let partner = table
                .records
                .values()
                .filter(|r| r.status == ConnectionStatus::Connected && r.peer_id() != peer_id)
                .map(|r| r.peer_id())
                .min();

            let record = table.record_mut(peer_id)?;
            record.transition(ConnectionEvent::Connect)?;
            record.info.address = request.peer.address.clone();
            record.info.rpc_address = request.peer.rpc_address.clone();
            record.handle = handle;
            record.partner = partner;

            let online = table.online_ids();
            self.replicas.seed(peer_id, &request.held_keys, &online);

            info!(
                peer_id,
                address = %request.peer.address,
                rpc_address = %request.peer.rpc_address,
                partner = ?partner,
                held_keys = request.held_keys.len(),
                "Peer connected"
            );
        }

        if self.config.sync_on_connect {
            self.spawn_clock_sync();
        }

        Ok(ConnectReply {
            min_peer_connections: self.config.min_peer_connections,
        })
    }

    /// Graceful exit: back to NotInGame
    pub fn disconnect(&self, peer_id: PeerId) -> Result<(), Rejection> {
        let mut table = self.table.write();
        let record = table.record_mut(peer_id)?;
        record.transition(ConnectionEvent::Leave)?;
        record.partner = None;

        for other in table.records.values_mut() {
            if other.partner == Some(peer_id) {
                other.partner = None;
            }
        }

        info!(peer_id, "Peer left the session");
        Ok(())
    }

    /// Other connected peers, assigned partner first. Polling also confirms
    /// a Reconnected caller as Connected.
    pub fn get_nodes(&self, peer_id: PeerId) -> Result<Vec<PeerInfo>, Rejection> {
        let (nodes, needs_confirm) = {
            let table = self.table.read();
            let record = table
                .records
                .get(&peer_id)
                .ok_or(Rejection::InvalidClient { peer_id })?;

            let mut nodes: Vec<PeerInfo> = table
                .records
                .values()
                .filter(|r| r.status == ConnectionStatus::Connected && r.peer_id() != peer_id)
                .map(|r| r.info.clone())
                .collect();
            nodes.sort_by_key(|info| (Some(info.peer_id) != record.partner, info.peer_id));

            (nodes, record.status == ConnectionStatus::Reconnected)
        };

        if needs_confirm {
            let mut table = self.table.write();
            if let Some(record) = table.records.get_mut(&peer_id) {
                // Status may have moved while the lock was released
                if record.status == ConnectionStatus::Reconnected {
                    record.transition(ConnectionEvent::Confirm)?;
                    info!(peer_id, "Recovered peer confirmed as connected");
                }
            }
        }

        Ok(nodes)
    }

    /// A client reports `peer_id` as failed
    pub fn notify_failure(&self, peer_id: PeerId) -> Result<(), Rejection> {
        let mut table = self.table.write();
        let record = table.record_mut(peer_id)?;
        match record.status {
            // Already left gracefully; late reports are harmless
            ConnectionStatus::NotInGame => {
                debug!(peer_id, "Ignoring failure report for peer not in game");
                Ok(())
            }
            ConnectionStatus::Disconnected => Ok(()),
            _ => {
                record.transition(ConnectionEvent::Fail)?;
                info!(peer_id, "Peer marked disconnected");
                Ok(())
            }
        }
    }

    /// A client saw `peer_id` answer again; probe it now instead of waiting
    /// for the next monitor tick
    pub async fn notify_recovery(&self, peer_id: PeerId) -> Result<(), Rejection> {
        let handle = {
            let table = self.table.read();
            let record = table
                .records
                .get(&peer_id)
                .ok_or(Rejection::InvalidClient { peer_id })?;
            if record.status != ConnectionStatus::Disconnected {
                return Ok(());
            }
            record.handle.clone()
        };

        let Some(handle) = handle else {
            return Ok(());
        };

        if self.probe(peer_id, handle).await && self.promote_recovered(peer_id) && self.config.sync_on_connect {
            self.spawn_clock_sync();
        }
        Ok(())
    }

    pub fn status(&self, peer_id: PeerId) -> Option<ConnectionStatus> {
        self.table.read().records.get(&peer_id).map(|r| r.status)
    }

    pub fn partner(&self, peer_id: PeerId) -> Option<PeerId> {
        self.table.read().records.get(&peer_id).and_then(|r| r.partner)
    }

    /// Last offset pushed to `peer_id` by a clock-sync round
    pub fn offset(&self, peer_id: PeerId) -> Option<chrono::Duration> {
        self.table.read().records.get(&peer_id).map(|r| r.offset)
    }

    pub fn summary(&self) -> DirectorySummary {
        let table = self.table.read();
        let mut summary = DirectorySummary {
            registered: table.records.len(),
            tracked_keys: self.replicas.tracked_keys(),
            ..Default::default()
        };
        for record in table.records.values() {
            match record.status {
                ConnectionStatus::NotInGame => summary.not_in_game += 1,
                ConnectionStatus::Connected => summary.connected += 1,
                ConnectionStatus::Disconnected => summary.disconnected += 1,
                ConnectionStatus::Reconnected => summary.reconnected += 1,
            }
        }
        summary
    }

    // ------------------------------------------------------------------------
    // Replicated stats
    // ------------------------------------------------------------------------

    pub async fn kv_get(&self, key: StatKey, requester: PeerId) -> Result<KvGetReply, Rejection> {
        let online = self.online_handles();
        self.replicas.get(key, requester, &online).await
    }

    pub async fn kv_put(&self, key: StatKey, value: Stats) -> Result<KvPutReply, Rejection> {
        let online = self.online_handles();
        self.replicas.put(key, value, &online).await
    }

    pub fn holders(&self, key: StatKey) -> Vec<PeerId> {
        self.replicas.holders(key)
    }

    fn online_handles(&self) -> Vec<(PeerId, Arc<dyn PeerApi>)> {
        self.table.read().handles_where(ConnectionStatus::is_online)
    }

    // ------------------------------------------------------------------------
    // Clock sync
    // ------------------------------------------------------------------------

    fn spawn_clock_sync(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.sync_clocks().await;
        });
    }

    /// Run one clock-sync round over every connected peer
    pub async fn sync_clocks(&self) -> Option<RoundOutcome> {
        let _round = self.sync_round.lock().await;

        let targets = self
            .table
            .read()
            .handles_where(|status| status == ConnectionStatus::Connected);
        if targets.is_empty() {
            return None;
        }

        let outcome = run_round(&self.clock, targets, self.timing.rpc_timeout).await;

        let mut table = self.table.write();
        for (peer_id, offset) in &outcome.adjusted {
            if let Some(record) = table.records.get_mut(peer_id) {
                record.offset = *offset;
            }
        }
        Some(outcome)
    }

    // ------------------------------------------------------------------------
    // Recovery monitor
    // ------------------------------------------------------------------------

    async fn probe(&self, peer_id: PeerId, handle: Arc<dyn PeerApi>) -> bool {
        match with_timeout(self.timing.liveness_timeout, handle.ping()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(peer_id, error = %e, "Recovery probe failed");
                false
            }
        }
    }

    fn promote_recovered(&self, peer_id: PeerId) -> bool {
        let mut table = self.table.write();
        let Some(record) = table.records.get_mut(&peer_id) else {
            return false;
        };
        if record.status != ConnectionStatus::Disconnected {
            return false;
        }
        match record.transition(ConnectionEvent::ProbeSucceeded) {
            Ok(_) => {
                info!(peer_id, "Disconnected peer answered, marked reconnected");
                true
            }
            Err(_) => false,
        }
    }

    /// Probe every disconnected peer once; returns the peers promoted
    pub async fn recovery_round(&self) -> Vec<PeerId> {
        let targets = self
            .table
            .read()
            .handles_where(|status| status == ConnectionStatus::Disconnected);
        if targets.is_empty() {
            return Vec::new();
        }

        let probes = targets.into_iter().map(|(peer_id, handle)| async move {
            (peer_id, self.probe(peer_id, handle).await)
        });

        let promoted: Vec<PeerId> = join_all(probes)
            .await
            .into_iter()
            .filter(|(peer_id, answered)| *answered && self.promote_recovered(*peer_id))
            .map(|(peer_id, _)| peer_id)
            .collect();

        if !promoted.is_empty() && self.config.sync_on_connect {
            self.spawn_clock_sync();
        }
        promoted
    }

    /// Run the recovery monitor (periodic probing of disconnected peers)
    pub async fn run_recovery_monitor(&self) {
        let mut interval = tokio::time::interval(self.timing.recovery_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let promoted = self.recovery_round().await;
            if !promoted.is_empty() {
                info!(?promoted, "Recovery monitor promoted peers");
            }
        }
    }
}

#[async_trait]
impl DirectoryApi for Directory {
    async fn register(&self, display_name: &str, peer_id: PeerId) -> Result<PeerNetSettings, RpcError> {
        Ok(Directory::register(self, display_name, peer_id)?)
    }

    async fn connect(&self, request: ConnectRequest) -> Result<ConnectReply, RpcError> {
        Ok(Directory::connect(self, request)?)
    }

    async fn disconnect(&self, peer_id: PeerId) -> Result<(), RpcError> {
        Ok(Directory::disconnect(self, peer_id)?)
    }

    async fn get_nodes(&self, peer_id: PeerId) -> Result<Vec<PeerInfo>, RpcError> {
        Ok(Directory::get_nodes(self, peer_id)?)
    }

    async fn notify_failure(&self, peer_id: PeerId) -> Result<(), RpcError> {
        Ok(Directory::notify_failure(self, peer_id)?)
    }

    async fn notify_recovery(&self, peer_id: PeerId) -> Result<(), RpcError> {
        Ok(Directory::notify_recovery(self, peer_id).await?)
    }

    async fn kv_get(&self, key: StatKey, requester: PeerId) -> Result<KvGetReply, RpcError> {
        Ok(Directory::kv_get(self, key, requester).await?)
    }

    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<KvPutReply, RpcError> {
        Ok(Directory::kv_put(self, key, value).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::memory::{peer_info, MemoryNetwork, StubPeer};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::time::Duration;

    fn timing() -> TimingConfig {
        TimingConfig {
            rpc_timeout: Duration::from_millis(200),
            liveness_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn directory(net: &MemoryNetwork) -> Arc<Directory> {
        let config = DirectoryConfig {
            sync_on_connect: false,
            ..Default::default()
        };
        let replicas = ReplicaIndex::with_rng(
            config.replication_factor,
            Duration::from_millis(200),
            ChaCha8Rng::seed_from_u64(7),
        );
        Directory::with_replicas(
            config,
            timing(),
            Arc::new(SessionClock::new()),
            Arc::new(net.clone()),
            replicas,
        )
    }

    /// Register and connect `id`, attaching a stub endpoint at its address
    fn join(dir: &Directory, net: &MemoryNetwork, id: PeerId, name: &str) -> Arc<StubPeer> {
        let stub = StubPeer::new();
        let info = peer_info(id, name);
        net.attach(&info.rpc_address, stub.clone());
        dir.register(name, id).unwrap();
        dir.connect(ConnectRequest {
            peer: info,
            held_keys: Vec::new(),
        })
        .unwrap();
        stub
    }

    #[test]
    fn display_names_are_unique() {
        let dir = directory(&MemoryNetwork::new());

        tokio_test::assert_ok!(dir.register("Alice", 1));
        let clash = dir.register("Alice", 2);

        assert_eq!(
            clash,
            Err(Rejection::DisplayNameInUse {
                display_name: "Alice".to_string()
            })
        );
        assert_eq!(dir.status(1), Some(ConnectionStatus::NotInGame));
        assert_eq!(dir.status(2), None);
    }

    #[test]
    fn repeated_registration_with_the_same_id_is_accepted() {
        let dir = directory(&MemoryNetwork::new());

        dir.register("Alice", 1).unwrap();
        let again = dir.register("Alice", 1).unwrap();

        assert_eq!(again.peer_id, 1);
        assert_eq!(again.min_peer_connections, 2);
        assert_eq!(dir.register("Bob", 1), Err(Rejection::PeerIdInUse { peer_id: 1 }));
    }

    #[tokio::test]
    async fn connect_rules() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);

        let unregistered = dir.connect(ConnectRequest {
            peer: peer_info(9, "Ghost"),
            held_keys: Vec::new(),
        });
        assert_eq!(unregistered, Err(Rejection::InvalidClient { peer_id: 9 }));

        join(&dir, &net, 1, "Alice");
        let twice = dir.connect(ConnectRequest {
            peer: peer_info(1, "Alice"),
            held_keys: Vec::new(),
        });
        assert_eq!(twice, Err(Rejection::AlreadyConnected { peer_id: 1 }));

        dir.disconnect(1).unwrap();
        assert_eq!(dir.status(1), Some(ConnectionStatus::NotInGame));
        tokio_test::assert_ok!(dir.connect(ConnectRequest {
            peer: peer_info(1, "Alice"),
            held_keys: Vec::new(),
        }));
    }

    #[tokio::test]
    async fn nodes_list_puts_the_partner_first() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        join(&dir, &net, 5, "Eve");
        join(&dir, &net, 2, "Bob");
        join(&dir, &net, 3, "Carol");

        assert_eq!(dir.partner(3), Some(2));

        let nodes: Vec<PeerId> = dir.get_nodes(3).unwrap().iter().map(|p| p.peer_id).collect();
        assert_eq!(nodes, vec![2, 5]);

        assert_eq!(dir.get_nodes(42), Err(Rejection::InvalidClient { peer_id: 42 }));
    }

    #[tokio::test]
    async fn failed_peers_are_hidden_and_recovered_on_poll() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        join(&dir, &net, 1, "Alice");
        join(&dir, &net, 2, "Bob");

        net.take_down("mem://2");
        dir.notify_failure(2).unwrap();
        assert_eq!(dir.status(2), Some(ConnectionStatus::Disconnected));
        assert!(dir.get_nodes(1).unwrap().is_empty());

        // Still unreachable: nothing to promote
        assert!(dir.recovery_round().await.is_empty());

        net.bring_up("mem://2");
        assert_eq!(dir.recovery_round().await, vec![2]);
        assert_eq!(dir.status(2), Some(ConnectionStatus::Reconnected));

        // Reconnected peers are not yet advertised
        assert!(dir.get_nodes(1).unwrap().is_empty());

        dir.get_nodes(2).unwrap();
        assert_eq!(dir.status(2), Some(ConnectionStatus::Connected));
        assert_eq!(dir.get_nodes(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_hint_probes_immediately() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        join(&dir, &net, 1, "Alice");

        dir.notify_failure(1).unwrap();
        dir.notify_recovery(1).await.unwrap();

        assert_eq!(dir.status(1), Some(ConnectionStatus::Reconnected));
        assert_eq!(net.calls("mem://1", "ping"), 1);
    }

    #[tokio::test]
    async fn failure_reports_after_a_graceful_exit_are_ignored() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        join(&dir, &net, 1, "Alice");

        dir.disconnect(1).unwrap();
        tokio_test::assert_ok!(dir.notify_failure(1));
        assert_eq!(dir.status(1), Some(ConnectionStatus::NotInGame));
    }

    #[tokio::test]
    async fn clock_sync_records_pushed_offsets() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        let alice = join(&dir, &net, 1, "Alice");
        let bob = join(&dir, &net, 2, "Bob");
        *alice.offset.lock() = chrono::Duration::milliseconds(600);

        let outcome = dir.sync_clocks().await.unwrap();

        assert_eq!(outcome.adjusted.len(), 2);
        assert!(outcome.skipped.is_empty());
        assert_eq!(dir.offset(1), Some(*alice.offset.lock()));
        assert_eq!(dir.offset(2), Some(*bob.offset.lock()));
        // Both peers and the directory moved towards ~200ms
        let mean = dir.clock().offset().num_milliseconds();
        assert!((150..=250).contains(&mean), "mean was {}", mean);
    }

    #[tokio::test]
    async fn stats_survive_a_holder_going_offline() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        let stubs: Vec<Arc<StubPeer>> = [(1, "A"), (2, "B"), (3, "C")]
            .into_iter()
            .map(|(id, name)| join(&dir, &net, id, name))
            .collect();

        let value = Stats { kills: 1, deaths: 0 };
        let reply = dir.kv_put(7, value).await.unwrap();
        assert_eq!(reply.written.len(), 3);
        assert!(stubs.iter().all(|s| s.records.lock().get(&7) == Some(&value)));

        net.take_down("mem://3");
        dir.notify_failure(3).unwrap();

        let d = join(&dir, &net, 4, "D");
        let read = dir.kv_get(7, 4).await.unwrap();
        assert_eq!(
            read,
            KvGetReply {
                has_already: false,
                value: Some(value)
            }
        );
        assert!(d.records.lock().is_empty());
        assert_eq!(net.calls("mem://3", "kv_get"), 0);

        // A holder asking for its own key reads locally
        let own = dir.kv_get(7, 1).await.unwrap();
        assert!(own.has_already);
        assert_eq!(net.calls("mem://1", "kv_get"), 0);
    }

    #[tokio::test]
    async fn held_keys_seed_the_replica_index() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        let stub = StubPeer::new();
        stub.records.lock().insert(11, Stats { kills: 2, deaths: 2 });
        net.attach("mem://1", stub);

        dir.register("Alice", 1).unwrap();
        dir.connect(ConnectRequest {
            peer: peer_info(1, "Alice"),
            held_keys: vec![11],
        })
        .unwrap();
        join(&dir, &net, 2, "Bob");

        assert_eq!(dir.holders(11), vec![1]);
        let read = dir.kv_get(11, 2).await.unwrap();
        assert_eq!(read.value, Some(Stats { kills: 2, deaths: 2 }));
    }

    #[tokio::test]
    async fn stats_with_no_online_holder_are_unavailable() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        join(&dir, &net, 1, "Alice");

        assert_eq!(
            dir.kv_get(3, 1).await,
            Err(Rejection::KeyUnavailable { key: 3 })
        );
    }

    #[test]
    fn summary_counts_statuses() {
        let net = MemoryNetwork::new();
        let dir = directory(&net);
        dir.register("Alice", 1).unwrap();
        dir.register("Bob", 2).unwrap();
        dir.connect(ConnectRequest {
            peer: peer_info(2, "Bob"),
            held_keys: Vec::new(),
        })
        .unwrap();

        let summary = dir.summary();
        assert_eq!(summary.registered, 2);
        assert_eq!(summary.not_in_game, 1);
        assert_eq!(summary.connected, 1);
    }
}
