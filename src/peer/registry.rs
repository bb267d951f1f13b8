//! Client-side table of known remote peers
//!
//! One mutex guards the table. Callers copy out the handles they need and
//! make RPCs after the guard is dropped; nothing here awaits while locked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::protocol::{PeerId, PeerInfo, Update};
use crate::rpc::PeerApi;

/// Updates queued per peer before new ones are dropped
const OUTBOUND_CAPACITY: usize = 256;

/// Local view of a remote peer's liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Connected,
    Disconnected,
}

pub struct PeerRecord {
    pub info: PeerInfo,
    pub api: Arc<dyn PeerApi>,
    /// Fire-and-forget update queue drained by this peer's sender task
    outbound: mpsc::Sender<Update>,
    pub last_heartbeat: Instant,
    pub status: PeerStatus,
    /// Consecutive failed heartbeats
    pub missed: u32,
}

pub struct PeerRegistry {
    self_id: PeerId,
    peers: Mutex<HashMap<PeerId, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    /// Add or replace a peer. Spawns the task that delivers its updates.
    /// Returns true if the peer was not known before.
    pub fn insert(&self, info: PeerInfo, api: Arc<dyn PeerApi>) -> bool {
        let peer_id = info.peer_id;
        if peer_id == self.self_id {
            return false;
        }

        let (outbound, mut rx) = mpsc::channel::<Update>(OUTBOUND_CAPACITY);
        let sender = api.clone();
        let self_id = self.self_id;
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                if let Err(e) = sender.notify_update(self_id, &update).await {
                    trace!(peer_id, error = %e, "Update delivery failed");
                }
            }
            debug!(peer_id, "Outbound update queue closed");
        });

        let record = PeerRecord {
            info,
            api,
            outbound,
            last_heartbeat: Instant::now(),
            status: PeerStatus::Connected,
            missed: 0,
        };

        let previous = self.peers.lock().insert(peer_id, record);
        if previous.is_none() {
            info!(peer_id, "Added peer to registry");
        }
        previous.is_none()
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.peers.lock().contains_key(&peer_id)
    }

    pub fn remove(&self, peer_id: PeerId) -> bool {
        let removed = self.peers.lock().remove(&peer_id).is_some();
        if removed {
            info!(peer_id, "Removed peer from registry");
        }
        removed
    }

    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn status(&self, peer_id: PeerId) -> Option<PeerStatus> {
        self.peers.lock().get(&peer_id).map(|r| r.status)
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .lock()
            .values()
            .filter(|r| r.status == PeerStatus::Connected)
            .count()
    }

    /// Every known peer's handle; heartbeats go to disconnected peers too so
    /// a recovery is noticed
    pub fn handles(&self) -> Vec<(PeerId, Arc<dyn PeerApi>)> {
        let mut handles: Vec<_> = self
            .peers
            .lock()
            .iter()
            .map(|(id, r)| (*id, r.api.clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    /// Handles of connected peers other than `exclude`
    pub fn connected_handles(&self, exclude: PeerId) -> Vec<(PeerId, Arc<dyn PeerApi>)> {
        let mut handles: Vec<_> = self
            .peers
            .lock()
            .iter()
            .filter(|(id, r)| **id != exclude && r.status == PeerStatus::Connected)
            .map(|(id, r)| (*id, r.api.clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    // ------------------------------------------------------------------------
    // Liveness bookkeeping
    // ------------------------------------------------------------------------

    /// An inbound heartbeat arrived from `peer_id`
    pub fn record_heartbeat(&self, peer_id: PeerId, at: Instant) -> bool {
        match self.peers.lock().get_mut(&peer_id) {
            Some(record) => {
                record.last_heartbeat = at;
                true
            }
            None => false,
        }
    }

    /// An outbound heartbeat succeeded. True if this revived the peer.
    pub fn heartbeat_succeeded(&self, peer_id: PeerId) -> bool {
        let mut peers = self.peers.lock();
        let Some(record) = peers.get_mut(&peer_id) else {
            return false;
        };
        record.missed = 0;
        if record.status == PeerStatus::Disconnected {
            record.status = PeerStatus::Connected;
            record.last_heartbeat = Instant::now();
            return true;
        }
        false
    }

    /// An outbound heartbeat failed. True once `max_missed` consecutive
    /// failures take a connected peer down.
    pub fn heartbeat_failed(&self, peer_id: PeerId, max_missed: u32) -> bool {
        let mut peers = self.peers.lock();
        let Some(record) = peers.get_mut(&peer_id) else {
            return false;
        };
        record.missed = record.missed.saturating_add(1);
        if record.status == PeerStatus::Connected && record.missed >= max_missed {
            record.status = PeerStatus::Disconnected;
            return true;
        }
        false
    }

    /// True if the peer was connected
    pub fn mark_disconnected(&self, peer_id: PeerId) -> bool {
        let mut peers = self.peers.lock();
        match peers.get_mut(&peer_id) {
            Some(record) if record.status == PeerStatus::Connected => {
                record.status = PeerStatus::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// True if the peer was disconnected
    pub fn mark_connected(&self, peer_id: PeerId) -> bool {
        let mut peers = self.peers.lock();
        match peers.get_mut(&peer_id) {
            Some(record) if record.status == PeerStatus::Disconnected => {
                record.status = PeerStatus::Connected;
                record.missed = 0;
                record.last_heartbeat = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Connected peers silent for longer than `timeout`
    pub fn overdue(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .lock()
            .iter()
            .filter(|(_, r)| {
                r.status == PeerStatus::Connected
                    && now.saturating_duration_since(r.last_heartbeat) > timeout
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    // ------------------------------------------------------------------------
    // Update fan-out
    // ------------------------------------------------------------------------

    /// Queue `update` for every connected peer without waiting on any of them
    pub fn broadcast(&self, update: &Update) -> usize {
        let peers = self.peers.lock();
        let mut queued = 0;
        for (peer_id, record) in peers.iter() {
            if record.status != PeerStatus::Connected {
                continue;
            }
            match record.outbound.try_send(*update) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer_id = *peer_id, "Outbound queue full, dropping update")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        queued
    }
}

/// Rebroadcast everything the update bus accepted
pub async fn forward_updates(mut accepted: mpsc::Receiver<Update>, registry: Arc<PeerRegistry>) {
    while let Some(update) = accepted.recv().await {
        let queued = registry.broadcast(&update);
        trace!(nonce = update.nonce, queued, "Rebroadcast update");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::memory::{peer_info, StubPeer};

    fn registry_with(ids: &[PeerId]) -> PeerRegistry {
        let registry = PeerRegistry::new(1);
        for id in ids {
            registry.insert(peer_info(*id, "p"), StubPeer::new());
        }
        registry
    }

    #[tokio::test]
    async fn ignores_self_and_reports_new_peers() {
        let registry = registry_with(&[]);

        assert!(!registry.insert(peer_info(1, "me"), StubPeer::new()));
        assert!(registry.insert(peer_info(2, "b"), StubPeer::new()));
        assert!(!registry.insert(peer_info(2, "b"), StubPeer::new()));
        assert_eq!(registry.ids(), vec![2]);
    }

    #[tokio::test]
    async fn missed_heartbeats_disconnect_once() {
        let registry = registry_with(&[2]);

        assert!(!registry.heartbeat_failed(2, 2));
        assert!(registry.heartbeat_failed(2, 2));
        assert!(!registry.heartbeat_failed(2, 2));
        assert_eq!(registry.status(2), Some(PeerStatus::Disconnected));

        assert!(registry.heartbeat_succeeded(2));
        assert!(!registry.heartbeat_succeeded(2));
        assert_eq!(registry.status(2), Some(PeerStatus::Connected));
    }

    #[tokio::test]
    async fn success_resets_the_miss_count() {
        let registry = registry_with(&[2]);

        registry.heartbeat_failed(2, 2);
        registry.heartbeat_succeeded(2);

        assert!(!registry.heartbeat_failed(2, 2));
        assert_eq!(registry.status(2), Some(PeerStatus::Connected));
    }

    #[tokio::test]
    async fn silent_peers_become_overdue() {
        let registry = registry_with(&[2, 3]);
        let later = Instant::now() + Duration::from_secs(10);
        registry.record_heartbeat(3, later);

        assert_eq!(registry.overdue(later, Duration::from_secs(5)), vec![2]);

        registry.mark_disconnected(2);
        assert!(registry.overdue(later, Duration::from_secs(5)).is_empty());
    }

    #[tokio::test]
    async fn broadcast_skips_disconnected_peers() {
        let registry = registry_with(&[2, 3, 4]);
        registry.mark_disconnected(3);

        let update = Update::dead(1, 2, chrono::Utc::now());
        assert_eq!(registry.broadcast(&update), 2);
        assert_eq!(
            registry
                .connected_handles(2)
                .iter()
                .map(|(id, _)| *id)
                .collect::<Vec<_>>(),
            vec![4]
        );
    }
}
