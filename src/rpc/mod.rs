//! RPC seams between peers and the directory
//!
//! Services talk to each other through these traits only. Production wires
//! them to HTTP/UDP clients (`client`); tests wire them to an in-memory
//! network (`memory`).

pub mod client;
#[cfg(test)]
pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as Offset;

use crate::protocol::{
    ConnectReply, ConnectRequest, FailureNotice, KvGetReply, KvPutReply, PeerId, PeerInfo,
    PeerNetSettings, Rejection, StatKey, Stats, TimeReply, Update,
};

pub use client::{HttpDialer, HttpDirectoryClient};

/// Failure of a remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The remote handler refused the request
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// Whether this error says something about the remote's liveness
    /// (as opposed to a protocol-level refusal)
    pub fn is_liveness_failure(&self) -> bool {
        matches!(self, RpcError::Timeout | RpcError::Transport(_))
    }
}

/// Bound a call by `limit`; a hung call becomes `RpcError::Timeout`
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RpcError>>,
) -> Result<T, RpcError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(RpcError::Timeout))
}

/// Calls a directory or peer can make on a peer
#[async_trait]
pub trait PeerApi: Send + Sync {
    async fn time_request(&self) -> Result<TimeReply, RpcError>;
    async fn set_offset(&self, offset: Offset) -> Result<(), RpcError>;
    async fn heartbeat(&self, from: PeerId) -> Result<(), RpcError>;
    async fn ping(&self) -> Result<(), RpcError>;
    async fn register_peer(&self, peer: &PeerInfo) -> Result<(), RpcError>;
    /// Fire-and-forget; success only means the message left this process
    async fn notify_update(&self, from: PeerId, update: &Update) -> Result<(), RpcError>;
    async fn notify_failure(&self, notice: FailureNotice) -> Result<(), RpcError>;
    async fn kv_get(&self, key: StatKey) -> Result<Stats, RpcError>;
    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<(), RpcError>;
}

/// Calls a peer can make on the directory
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn register(&self, display_name: &str, peer_id: PeerId)
        -> Result<PeerNetSettings, RpcError>;
    async fn connect(&self, request: ConnectRequest) -> Result<ConnectReply, RpcError>;
    async fn disconnect(&self, peer_id: PeerId) -> Result<(), RpcError>;
    async fn get_nodes(&self, peer_id: PeerId) -> Result<Vec<PeerInfo>, RpcError>;
    async fn notify_failure(&self, peer_id: PeerId) -> Result<(), RpcError>;
    async fn notify_recovery(&self, peer_id: PeerId) -> Result<(), RpcError>;
    async fn kv_get(&self, key: StatKey, requester: PeerId) -> Result<KvGetReply, RpcError>;
    async fn kv_put(&self, key: StatKey, value: Stats) -> Result<KvPutReply, RpcError>;
}

/// Produces handles to remote peers
pub trait Dialer: Send + Sync {
    fn dial(&self, peer: &PeerInfo) -> Result<Arc<dyn PeerApi>, RpcError>;
}
