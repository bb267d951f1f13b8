//! Heartbeats, the passive monitor and gossip of failure notices

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::registry::PeerRegistry;
use crate::config::TimingConfig;
use crate::protocol::{FailureNotice, NoticeKind, PeerId};
use crate::rpc::{with_timeout, DirectoryApi, PeerApi};

pub struct Liveness {
    registry: Arc<PeerRegistry>,
    directory: Arc<dyn DirectoryApi>,
    timing: TimingConfig,
    gossip_ttl: u32,
}

impl Liveness {
    pub fn new(
        registry: Arc<PeerRegistry>,
        directory: Arc<dyn DirectoryApi>,
        timing: TimingConfig,
        gossip_ttl: u32,
    ) -> Self {
        Self {
            registry,
            directory,
            timing,
            gossip_ttl,
        }
    }

    fn self_id(&self) -> PeerId {
        self.registry.self_id()
    }

    /// Heartbeat every known peer once. Returns peers newly declared dead.
    pub async fn heartbeat_round(&self) -> Vec<PeerId> {
        let self_id = self.self_id();
        let timeout = self.timing.liveness_timeout;

        let beats = self.registry.handles().into_iter().map(|(peer_id, api)| async move {
            (peer_id, with_timeout(timeout, api.heartbeat(self_id)).await)
        });

        let mut lost = Vec::new();
        for (peer_id, result) in join_all(beats).await {
            match result {
                Ok(()) => {
                    if self.registry.heartbeat_succeeded(peer_id) {
                        self.handle_reconnection(peer_id).await;
                    }
                }
                // A refusal still proves the peer answered
                Err(e) if !e.is_liveness_failure() => {
                    warn!(peer_id, error = %e, "Heartbeat refused");
                    if self.registry.heartbeat_succeeded(peer_id) {
                        self.handle_reconnection(peer_id).await;
                    }
                }
                Err(e) => {
                    debug!(peer_id, error = %e, "Heartbeat failed");
                    if self
                        .registry
                        .heartbeat_failed(peer_id, self.timing.max_missed_heartbeats)
                    {
                        self.handle_disconnection(peer_id).await;
                        lost.push(peer_id);
                    }
                }
            }
        }
        lost
    }

    /// Declare dead every peer that stopped heartbeating us
    pub async fn monitor_round(&self, now: Instant) -> Vec<PeerId> {
        let mut lost = Vec::new();
        for peer_id in self.registry.overdue(now, self.timing.passive_timeout) {
            if self.registry.mark_disconnected(peer_id) {
                info!(peer_id, "No heartbeat from peer within timeout");
                self.handle_disconnection(peer_id).await;
                lost.push(peer_id);
            }
        }
        lost
    }

    /// The peer is already marked disconnected locally; tell the directory
    /// and flood the news
    async fn handle_disconnection(&self, peer_id: PeerId) {
        warn!(peer_id, "Peer disconnected");

        if let Err(e) = with_timeout(self.timing.rpc_timeout, self.directory.notify_failure(peer_id)).await {
            warn!(peer_id, error = %e, "Could not report failure to directory");
        }

        self.flood(FailureNotice::failed(peer_id, self.gossip_ttl), peer_id)
            .await;
    }

    async fn handle_reconnection(&self, peer_id: PeerId) {
        info!(peer_id, "Peer reachable again");

        if let Err(e) = with_timeout(self.timing.rpc_timeout, self.directory.notify_recovery(peer_id)).await {
            warn!(peer_id, error = %e, "Could not report recovery to directory");
        }

        self.flood(FailureNotice::recovered(peer_id, self.gossip_ttl), peer_id)
            .await;
    }

    /// Send `notice` to every connected peer except its subject
    async fn flood(&self, notice: FailureNotice, subject: PeerId) {
        let targets = self.registry.connected_handles(subject);
        if targets.is_empty() {
            return;
        }
        debug!(
            peer_id = notice.peer_id,
            ttl = notice.ttl,
            fanout = targets.len(),
            "Flooding liveness notice"
        );

        let timeout = self.timing.liveness_timeout;
        let sends = targets.into_iter().map(|(target, api): (PeerId, Arc<dyn PeerApi>)| async move {
            if let Err(e) = with_timeout(timeout, api.notify_failure(notice)).await {
                debug!(target, error = %e, "Gossip send failed");
            }
        });
        join_all(sends).await;
    }

    /// Apply a notice received from another peer. It is forwarded only if it
    /// changed our view and still has hop budget, which bounds the flood.
    pub async fn on_notice(&self, notice: FailureNotice) {
        if notice.peer_id == self.self_id() {
            debug!(kind = ?notice.kind, "Ignoring liveness notice about ourselves");
            return;
        }

        let changed = match notice.kind {
            NoticeKind::Failed => self.registry.mark_disconnected(notice.peer_id),
            NoticeKind::Recovered => self.registry.mark_connected(notice.peer_id),
        };
        if !changed {
            return;
        }
        info!(peer_id = notice.peer_id, kind = ?notice.kind, ttl = notice.ttl, "Applied gossiped liveness notice");

        if let Some(next) = notice.forwarded() {
            self.flood(next, notice.peer_id).await;
        }
    }

    pub async fn run_heartbeats(&self) {
        let mut interval = tokio::time::interval(self.timing.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.heartbeat_round().await;
        }
    }

    pub async fn run_monitor(&self) {
        let mut interval = tokio::time::interval(self.timing.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.monitor_round(Instant::now()).await;
        }
    }
}
