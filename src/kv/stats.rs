//! Peer-side access to replicated stats records

use std::sync::Arc;

use tracing::{debug, warn};

use super::store::StatsStore;
use crate::protocol::{KvPutReply, PeerId, Rejection, StatKey, Stats};
use crate::rpc::{DirectoryApi, RpcError};

/// Reads and writes stats through the directory, using the local replica
/// when the directory says this peer already holds the record
pub struct StatsClient {
    peer_id: PeerId,
    directory: Arc<dyn DirectoryApi>,
    local: Arc<StatsStore>,
}

impl StatsClient {
    pub fn new(peer_id: PeerId, directory: Arc<dyn DirectoryApi>, local: Arc<StatsStore>) -> Self {
        Self {
            peer_id,
            directory,
            local,
        }
    }

    pub async fn get(&self, key: StatKey) -> Result<Stats, RpcError> {
        let reply = self.directory.kv_get(key, self.peer_id).await?;
        if reply.has_already {
            return self
                .local
                .get(key)
                .ok_or(RpcError::Rejected(Rejection::KeyUnavailable { key }));
        }
        reply
            .value
            .ok_or(RpcError::Rejected(Rejection::KeyUnavailable { key }))
    }

    pub async fn put(&self, key: StatKey, value: Stats) -> Result<KvPutReply, RpcError> {
        self.directory.kv_put(key, value).await
    }

    pub async fn record_kill(&self) -> Result<Stats, RpcError> {
        self.bump(|stats| stats.kills += 1).await
    }

    pub async fn record_death(&self) -> Result<Stats, RpcError> {
        self.bump(|stats| stats.deaths += 1).await
    }

    /// Read-modify-write of this peer's own record. A record nobody holds yet
    /// starts from zero.
    async fn bump(&self, change: impl FnOnce(&mut Stats)) -> Result<Stats, RpcError> {
        let key = self.peer_id;
        let mut stats = match self.get(key).await {
            Ok(stats) => stats,
            Err(RpcError::Rejected(Rejection::KeyUnavailable { .. })) => Stats::default(),
            Err(e) => return Err(e),
        };

        change(&mut stats);

        let reply = self.put(key, stats).await?;
        if !reply.failed.is_empty() {
            warn!(key, failed = ?reply.failed, "Stats write missed some replicas");
        }
        debug!(key, kills = stats.kills, deaths = stats.deaths, "Updated own stats");
        Ok(stats)
    }
}
