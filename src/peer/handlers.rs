//! Inbound peer RPCs

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Duration as Offset;
use tracing::{debug, error, info};

use super::liveness::Liveness;
use super::registry::PeerRegistry;
use crate::bus::{UpdateBus, Verdict};
use crate::kv::{StatsClient, StatsStore};
use crate::protocol::{
    FailureNotice, PeerId, PeerInfo, Rejection, StatKey, Stats, TimeReply, Update, UpdateKind,
};
use crate::rpc::{Dialer, PeerApi, RpcError};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::duration_to_nanos;

/// What a peer serves to the directory and to other peers
pub struct PeerService {
    self_id: PeerId,
    registry: Arc<PeerRegistry>,
    dialer: Arc<dyn Dialer>,
    liveness: Arc<Liveness>,
    bus: Arc<UpdateBus>,
    limiter: PlayerRateLimiter,
    store: Arc<StatsStore>,
    stats: Arc<StatsClient>,
}

impl PeerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: PeerId,
        registry: Arc<PeerRegistry>,
        dialer: Arc<dyn Dialer>,
        liveness: Arc<Liveness>,
        bus: Arc<UpdateBus>,
        update_rate_limit: u32,
        store: Arc<StatsStore>,
        stats: Arc<StatsClient>,
    ) -> Self {
        Self {
            self_id,
            registry,
            dialer,
            liveness,
            bus,
            limiter: PlayerRateLimiter::new(update_rate_limit),
            store,
            stats,
        }
    }

    pub fn time(&self) -> TimeReply {
        let clock = self.bus.clock();
        TimeReply {
            time: clock.now(),
            offset_nanos: duration_to_nanos(clock.offset()),
        }
    }

    pub fn set_offset(&self, offset: Offset) {
        self.bus.clock().set_offset(offset);
        info!(offset_ms = offset.num_milliseconds(), "Clock offset updated");
    }

    pub fn heartbeat(&self, from: PeerId) {
        if !self.registry.record_heartbeat(from, Instant::now()) {
            debug!(from, "Heartbeat from unknown peer");
        }
    }

    /// Another peer dialed us; dial it back
    pub fn register_peer(&self, peer: &PeerInfo) -> Result<(), Rejection> {
        let api = self.dialer.dial(peer).map_err(|e| {
            debug!(peer_id = peer.peer_id, error = %e, "Cannot dial back registering peer");
            Rejection::InvalidAddress {
                peer_id: peer.peer_id,
            }
        })?;
        if self.registry.insert(peer.clone(), api) {
            info!(peer_id = peer.peer_id, display_name = %peer.display_name, "Peer registered with us");
        }
        Ok(())
    }

    /// Entry point for updates from other peers. `from` is whoever relayed
    /// the update, so the budget is charged to its author, and only for
    /// updates not already seen through another relay.
    pub fn receive_update(&self, from: PeerId, update: Update) -> Option<Verdict> {
        if self.bus.has_seen(update.nonce) {
            return Some(Verdict::Duplicate);
        }
        if !self.limiter.check(update.player_id) {
            debug!(from, player_id = update.player_id, "Update rate limit exceeded, dropping");
            return None;
        }
        Some(self.ingest(update))
    }

    /// Submit an update to the bus; accepted deaths feed the stats counters
    pub fn ingest(&self, update: Update) -> Verdict {
        let verdict = self.bus.submit(update);
        if !verdict.is_accepted() {
            return verdict;
        }

        if let UpdateKind::Dead { cause } = update.kind {
            let stats = self.stats.clone();
            if update.player_id == self.self_id {
                tokio::spawn(async move {
                    if let Err(e) = stats.record_death().await {
                        error!(error = %e, "Failed to record death");
                    }
                });
            } else if cause == self.self_id {
                tokio::spawn(async move {
                    if let Err(e) = stats.record_kill().await {
                        error!(error = %e, "Failed to record kill");
                    }
                });
            }
        }
        verdict
    }

    pub fn kv_get(&self, key: StatKey) -> Result<Stats, Rejection> {
        self.store.get(key).ok_or(Rejection::KeyUnavailable { key })
    }

    pub fn kv_put(&self, key: StatKey, value: Stats) -> Result<(), Rejection> {
        self.store.put(key, value).map_err(|e| Rejection::Storage {
            message: e.to_string(),
        })
    }

    pub async fn notify_failure(&self, notice: FailureNotice) {
        self.liveness.on_notice(notice).await;
    }
}

#[async_trait]
impl PeerApi for PeerService {
    async fn time_request(&self) -> Result<TimeReply, RpcError> {
        Ok(self.time())
    }

    async fn set_offset(&self, offset: Offset) -> Result<(), RpcError> {
        PeerService::set_offset(self, offset);
        Ok(())
    }

    async fn heartbeat(&self, from: PeerId) -> Result<(), RpcError> {
        PeerService::heartbeat(self, from);
        Ok(())
    }

    async fn ping(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn register_peer(&self, peer: &PeerInfo) -> Result<(), RpcError> {
        Ok(PeerService::register_peer(self, peer)?)
    }

    async fn notify_update(&self, from: PeerId, update: &Update) -> Result<(), RpcError> {
        self.receive_update(from, *update);
        Ok(())
    }

    async fn notify_failure(&self, notice: FailureNotice) -> Result<(), RpcError> {
        PeerService::notify_failure(self, notice).await;
        Ok(())
    }

    async fn kv_get(&self, key: StatKey) -> Result<Stats, RpcError> {
        Ok(PeerService::kv_get(self, key)?)
    }

    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<(), RpcError> {
        Ok(PeerService::kv_put(self, key, value)?)
    }
}
