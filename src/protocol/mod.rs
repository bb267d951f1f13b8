//! Wire protocol definitions
//! These are the request/reply types for directory and peer RPCs

pub mod update;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

pub use update::{Update, UpdateKind, Vec2};

/// Stable numeric identity of a peer
pub type PeerId = u64;

/// Key of a replicated stats record (the owning peer's id)
pub type StatKey = u64;

/// Identity and addresses of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub display_name: String,
    /// Primary (datagram) address for fire-and-forget updates
    pub address: String,
    /// RPC address (host:port of the peer's HTTP surface)
    pub rpc_address: String,
}

/// Settings handed to a peer on registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNetSettings {
    pub peer_id: PeerId,
    pub display_name: String,
    pub min_peer_connections: u8,
}

/// Per-peer counters held by the replicated stats store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub kills: u32,
    pub deaths: u32,
}

// ============================================================================
// Directory requests / replies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub display_name: String,
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub peer: PeerInfo,
    /// Stats keys this peer found on disk at startup
    #[serde(default)]
    pub held_keys: Vec<StatKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectReply {
    pub min_peer_connections: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeerIdRequest {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesReply {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KvGetRequest {
    pub key: StatKey,
    pub requester: PeerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvGetReply {
    /// The requester holds the record itself and should read its local copy
    pub has_already: bool,
    pub value: Option<Stats>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KvPutRequest {
    pub key: StatKey,
    pub value: Stats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPutReply {
    /// Holders that accepted the write
    pub written: Vec<PeerId>,
    /// Selected holders the write did not reach
    pub failed: Vec<PeerId>,
}

// ============================================================================
// Peer requests / replies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeReply {
    pub time: chrono::DateTime<chrono::Utc>,
    /// The responder's current clock offset
    pub offset_nanos: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SetOffsetRequest {
    pub offset_nanos: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub from: PeerId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KvClientGetRequest {
    pub key: StatKey,
}

/// Whether a flooded notice reports a failure or a recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Failed,
    Recovered,
}

/// Gossip notice about a peer's liveness, flooded with a hop budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub peer_id: PeerId,
    pub kind: NoticeKind,
    /// Remaining hop budget; a receiver holding 0 does not forward
    pub ttl: u32,
}

impl FailureNotice {
    pub fn failed(peer_id: PeerId, ttl: u32) -> Self {
        Self {
            peer_id,
            kind: NoticeKind::Failed,
            ttl,
        }
    }

    pub fn recovered(peer_id: PeerId, ttl: u32) -> Self {
        Self {
            peer_id,
            kind: NoticeKind::Recovered,
            ttl,
        }
    }

    /// The notice as forwarded one hop further, if budget remains
    pub fn forwarded(&self) -> Option<Self> {
        (self.ttl > 0).then(|| Self {
            ttl: self.ttl - 1,
            ..*self
        })
    }
}

/// Messages carried on the datagram transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Datagram {
    Update { from: PeerId, update: Update },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    pub ack: bool,
}

impl Ack {
    pub const OK: Ack = Ack { ack: true };
}

// ============================================================================
// Protocol rejections
// ============================================================================

/// Structured rejection returned by a handler to its caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Rejection {
    #[error("display name {display_name} is already in use")]
    DisplayNameInUse { display_name: String },

    #[error("peer id {peer_id} is registered under another name")]
    PeerIdInUse { peer_id: PeerId },

    #[error("invalid client {peer_id}, please register")]
    InvalidClient { peer_id: PeerId },

    #[error("client {peer_id} is already connected")]
    AlreadyConnected { peer_id: PeerId },

    #[error("stats for key {key} are unavailable")]
    KeyUnavailable { key: StatKey },

    #[error("peer {peer_id} cannot {event} while {from}")]
    IllegalTransition {
        peer_id: PeerId,
        from: String,
        event: String,
    },

    #[error("peer {peer_id} advertised an unusable address")]
    InvalidAddress { peer_id: PeerId },

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::DisplayNameInUse { .. }
            | Rejection::PeerIdInUse { .. }
            | Rejection::AlreadyConnected { .. }
            | Rejection::IllegalTransition { .. } => StatusCode::CONFLICT,
            Rejection::InvalidClient { .. } => StatusCode::NOT_FOUND,
            Rejection::InvalidAddress { .. } => StatusCode::BAD_REQUEST,
            Rejection::KeyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Rejection::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self)).into_response()
    }
}
