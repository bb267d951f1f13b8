//! In-process network for tests: peers are reached by RPC address, and any
//! address can be taken down to simulate a crashed or partitioned peer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as Offset;
use parking_lot::Mutex;

use super::{Dialer, PeerApi, RpcError};
use crate::protocol::{FailureNotice, PeerId, PeerInfo, StatKey, Stats, TimeReply, Update};

#[derive(Default)]
struct NetState {
    endpoints: HashMap<String, Arc<dyn PeerApi>>,
    down: HashSet<String>,
    calls: HashMap<(String, &'static str), usize>,
}

#[derive(Default, Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, rpc_address: &str, endpoint: Arc<dyn PeerApi>) {
        self.state
            .lock()
            .endpoints
            .insert(rpc_address.to_string(), endpoint);
    }

    /// Make every call to `rpc_address` time out
    pub fn take_down(&self, rpc_address: &str) {
        self.state.lock().down.insert(rpc_address.to_string());
    }

    pub fn bring_up(&self, rpc_address: &str) {
        self.state.lock().down.remove(rpc_address);
    }

    /// Number of calls of `method` that reached `rpc_address`
    pub fn calls(&self, rpc_address: &str, method: &'static str) -> usize {
        self.state
            .lock()
            .calls
            .get(&(rpc_address.to_string(), method))
            .copied()
            .unwrap_or(0)
    }

    fn route(&self, rpc_address: &str, method: &'static str) -> Result<Arc<dyn PeerApi>, RpcError> {
        let mut state = self.state.lock();
        if state.down.contains(rpc_address) {
            return Err(RpcError::Timeout);
        }
        let endpoint = state
            .endpoints
            .get(rpc_address)
            .cloned()
            .ok_or_else(|| RpcError::Transport(format!("connection refused: {}", rpc_address)))?;
        *state
            .calls
            .entry((rpc_address.to_string(), method))
            .or_default() += 1;
        Ok(endpoint)
    }
}

impl Dialer for MemoryNetwork {
    fn dial(&self, peer: &PeerInfo) -> Result<Arc<dyn PeerApi>, RpcError> {
        Ok(Arc::new(MemoryLink {
            net: self.clone(),
            rpc_address: peer.rpc_address.clone(),
        }))
    }
}

/// A dialed handle; resolves its target on every call
struct MemoryLink {
    net: MemoryNetwork,
    rpc_address: String,
}

#[async_trait]
impl PeerApi for MemoryLink {
    async fn time_request(&self) -> Result<TimeReply, RpcError> {
        self.net.route(&self.rpc_address, "time_request")?.time_request().await
    }

    async fn set_offset(&self, offset: Offset) -> Result<(), RpcError> {
        self.net.route(&self.rpc_address, "set_offset")?.set_offset(offset).await
    }

    async fn heartbeat(&self, from: PeerId) -> Result<(), RpcError> {
        self.net.route(&self.rpc_address, "heartbeat")?.heartbeat(from).await
    }

    async fn ping(&self) -> Result<(), RpcError> {
        self.net.route(&self.rpc_address, "ping")?.ping().await
    }

    async fn register_peer(&self, peer: &PeerInfo) -> Result<(), RpcError> {
        self.net
            .route(&self.rpc_address, "register_peer")?
            .register_peer(peer)
            .await
    }

    async fn notify_update(&self, from: PeerId, update: &Update) -> Result<(), RpcError> {
        self.net
            .route(&self.rpc_address, "notify_update")?
            .notify_update(from, update)
            .await
    }

    async fn notify_failure(&self, notice: FailureNotice) -> Result<(), RpcError> {
        self.net
            .route(&self.rpc_address, "notify_failure")?
            .notify_failure(notice)
            .await
    }

    async fn kv_get(&self, key: StatKey) -> Result<Stats, RpcError> {
        self.net.route(&self.rpc_address, "kv_get")?.kv_get(key).await
    }

    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<(), RpcError> {
        self.net.route(&self.rpc_address, "kv_put")?.kv_put(key, value).await
    }
}

/// Peer info whose RPC address is derived from the id (tests only)
pub fn peer_info(peer_id: PeerId, name: &str) -> PeerInfo {
    PeerInfo {
        peer_id,
        display_name: name.to_string(),
        address: format!("mem://{}/updates", peer_id),
        rpc_address: format!("mem://{}", peer_id),
    }
}

/// Minimal peer endpoint: answers liveness and clock calls and keeps stats
/// records in memory
#[derive(Default)]
pub struct StubPeer {
    pub offset: Mutex<Offset>,
    pub records: Mutex<HashMap<StatKey, Stats>>,
    pub heartbeats: Mutex<Vec<PeerId>>,
    pub notices: Mutex<Vec<FailureNotice>>,
}

impl StubPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            offset: Mutex::new(Offset::zero()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl PeerApi for StubPeer {
    async fn time_request(&self) -> Result<TimeReply, RpcError> {
        let offset = *self.offset.lock();
        Ok(TimeReply {
            time: chrono::Utc::now() + offset,
            offset_nanos: crate::util::time::duration_to_nanos(offset),
        })
    }

    async fn set_offset(&self, offset: Offset) -> Result<(), RpcError> {
        *self.offset.lock() = offset;
        Ok(())
    }

    async fn heartbeat(&self, from: PeerId) -> Result<(), RpcError> {
        self.heartbeats.lock().push(from);
        Ok(())
    }

    async fn ping(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn register_peer(&self, _peer: &PeerInfo) -> Result<(), RpcError> {
        Ok(())
    }

    async fn notify_update(&self, _from: PeerId, _update: &Update) -> Result<(), RpcError> {
        Ok(())
    }

    async fn notify_failure(&self, notice: FailureNotice) -> Result<(), RpcError> {
        self.notices.lock().push(notice);
        Ok(())
    }

    async fn kv_get(&self, key: StatKey) -> Result<Stats, RpcError> {
        self.records
            .lock()
            .get(&key)
            .copied()
            .ok_or(RpcError::Rejected(crate::protocol::Rejection::KeyUnavailable { key }))
    }

    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<(), RpcError> {
        self.records.lock().insert(key, value);
        Ok(())
    }
}
