//! Replica placement for stats records (directory side)
//!
//! The directory remembers which peers hold each key, proxies reads to an
//! online holder, and tops writes up to the replication factor with randomly
//! chosen online peers. Holder lists only grow; offline entries are filtered
//! when read.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::protocol::{KvGetReply, KvPutReply, PeerId, Rejection, StatKey, Stats};
use crate::rpc::{with_timeout, PeerApi};

/// Online peers with their RPC handles, in directory order
pub type OnlinePeers = [(PeerId, Arc<dyn PeerApi>)];

pub struct ReplicaIndex {
    replication_factor: usize,
    call_timeout: Duration,
    holders: RwLock<HashMap<StatKey, Vec<PeerId>>>,
    rng: Mutex<ChaCha8Rng>,
    /// One writer per key; puts to different keys never wait on each other
    write_locks: DashMap<StatKey, Arc<tokio::sync::Mutex<()>>>,
}

impl ReplicaIndex {
    pub fn new(replication_factor: usize, call_timeout: Duration) -> Self {
        Self::with_rng(replication_factor, call_timeout, ChaCha8Rng::from_entropy())
    }

    pub fn with_rng(replication_factor: usize, call_timeout: Duration, rng: ChaCha8Rng) -> Self {
        Self {
            replication_factor: replication_factor.max(1),
            call_timeout,
            holders: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
            write_locks: DashMap::new(),
        }
    }

    /// Every peer ever recorded as holding `key`
    pub fn holders(&self, key: StatKey) -> Vec<PeerId> {
        self.holders.read().get(&key).cloned().unwrap_or_default()
    }

    pub fn tracked_keys(&self) -> usize {
        self.holders.read().len()
    }

    /// Record `peer_id` as a holder of keys it found on disk at startup,
    /// as long as the key is short of online holders
    pub fn seed(&self, peer_id: PeerId, keys: &[StatKey], online: &HashSet<PeerId>) {
        let mut holders = self.holders.write();
        for key in keys {
            let list = holders.entry(*key).or_default();
            if list.contains(&peer_id) {
                continue;
            }
            let online_count = list.iter().filter(|id| online.contains(id)).count();
            if online_count < self.replication_factor {
                list.push(peer_id);
                debug!(key, peer_id, "Seeded holder from persisted replica");
            }
        }
    }

    /// Online holders of `key`, in the order they were recorded
    fn online_holders(&self, key: StatKey, online: &OnlinePeers) -> Vec<(PeerId, Arc<dyn PeerApi>)> {
        let recorded = self.holders(key);
        recorded
            .into_iter()
            .filter_map(|id| {
                online
                    .iter()
                    .find(|(peer_id, _)| *peer_id == id)
                    .map(|(peer_id, handle)| (*peer_id, handle.clone()))
            })
            .collect()
    }

    /// Read `key` on behalf of `requester`
    pub async fn get(
        &self,
        key: StatKey,
        requester: PeerId,
        online: &OnlinePeers,
    ) -> Result<KvGetReply, Rejection> {
        let holders = self.online_holders(key, online);
        if holders.is_empty() {
            debug!(key, "No online holder for key");
            return Err(Rejection::KeyUnavailable { key });
        }

        if holders.iter().any(|(id, _)| *id == requester) {
            return Ok(KvGetReply {
                has_already: true,
                value: None,
            });
        }

        for (holder, handle) in holders {
            match with_timeout(self.call_timeout, handle.kv_get(key)).await {
                Ok(value) => {
                    debug!(key, holder, "Proxied stats read");
                    return Ok(KvGetReply {
                        has_already: false,
                        value: Some(value),
                    });
                }
                Err(e) => warn!(key, holder, error = %e, "Replica read failed, trying next holder"),
            }
        }

        Err(Rejection::KeyUnavailable { key })
    }

    /// Write `key` to its online holders, topping up to the replication factor
    pub async fn put(
        &self,
        key: StatKey,
        value: Stats,
        online: &OnlinePeers,
    ) -> Result<KvPutReply, Rejection> {
        let write_lock = self.write_locks.entry(key).or_default().clone();
        let _writer = write_lock.lock().await;

        let selected = self.select(key, online);
        if selected.is_empty() {
            return Err(Rejection::KeyUnavailable { key });
        }

        let calls = selected.iter().map(|(holder, handle)| {
            let holder = *holder;
            let handle = handle.clone();
            async move {
                (
                    holder,
                    with_timeout(self.call_timeout, handle.kv_put(key, value)).await,
                )
            }
        });

        let mut reply = KvPutReply::default();
        for (holder, result) in join_all(calls).await {
            match result {
                Ok(()) => reply.written.push(holder),
                Err(e) => {
                    warn!(key, holder, error = %e, "Replica write failed");
                    reply.failed.push(holder);
                }
            }
        }

        if reply.written.is_empty() {
            return Err(Rejection::KeyUnavailable { key });
        }

        {
            let mut holders = self.holders.write();
            let list = holders.entry(key).or_default();
            for holder in &reply.written {
                if !list.contains(holder) {
                    list.push(*holder);
                }
            }
        }

        info!(
            key,
            written = reply.written.len(),
            failed = reply.failed.len(),
            "Stats write replicated"
        );
        Ok(reply)
    }

    /// Online holders plus a random top-up of other online peers
    fn select(&self, key: StatKey, online: &OnlinePeers) -> Vec<(PeerId, Arc<dyn PeerApi>)> {
        let mut selected = self.online_holders(key, online);
        if selected.len() >= self.replication_factor {
            return selected;
        }

        let mut candidates: Vec<(PeerId, Arc<dyn PeerApi>)> = online
            .iter()
            .filter(|(id, _)| !selected.iter().any(|(held, _)| held == id))
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        candidates.shuffle(&mut *self.rng.lock());

        let needed = self.replication_factor - selected.len();
        selected.extend(candidates.into_iter().take(needed));
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FailureNotice, PeerInfo, TimeReply, Update};
    use crate::rpc::RpcError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Replica holder with an in-memory record
    #[derive(Default)]
    struct Holder {
        value: Mutex<Option<Stats>>,
        down: AtomicBool,
        hung: AtomicBool,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl PeerApi for Holder {
        async fn time_request(&self) -> Result<TimeReply, RpcError> {
            Err(RpcError::Timeout)
        }
        async fn set_offset(&self, _offset: chrono::Duration) -> Result<(), RpcError> {
            Ok(())
        }
        async fn heartbeat(&self, _from: PeerId) -> Result<(), RpcError> {
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
        async fn notify_failure(&self, _notice: FailureNotice) -> Result<(), RpcError> {
            Ok(())
        }
        async fn kv_get(&self, key: StatKey) -> Result<Stats, RpcError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(RpcError::Timeout);
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.value
                .lock()
                .ok_or(RpcError::Rejected(Rejection::KeyUnavailable { key }))
        }
        async fn kv_put(&self, _key: StatKey, value: Stats) -> Result<(), RpcError> {
            if self.hung.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(RpcError::Timeout);
            }
            *self.value.lock() = Some(value);
            Ok(())
        }
    }

    fn cluster(n: u64) -> (Vec<Arc<Holder>>, Vec<(PeerId, Arc<dyn PeerApi>)>) {
        let holders: Vec<Arc<Holder>> = (0..n).map(|_| Arc::new(Holder::default())).collect();
        let online = holders
            .iter()
            .enumerate()
            .map(|(i, h)| (i as PeerId + 1, h.clone() as Arc<dyn PeerApi>))
            .collect();
        (holders, online)
    }

    fn index() -> ReplicaIndex {
        ReplicaIndex::with_rng(3, Duration::from_secs(1), ChaCha8Rng::seed_from_u64(7))
    }

    const RECORD: Stats = Stats { kills: 1, deaths: 0 };

    #[tokio::test]
    async fn put_selects_replication_factor_holders() {
        let (_holders, online) = cluster(5);
        let index = index();

        let reply = index.put(10, RECORD, &online).await.unwrap();

        assert_eq!(reply.written.len(), 3);
        assert!(reply.failed.is_empty());
        assert_eq!(index.holders(10).len(), 3);
    }

    #[tokio::test]
    async fn put_with_few_peers_uses_everyone_online() {
        let (_holders, online) = cluster(2);
        let index = index();

        let reply = index.put(10, RECORD, &online).await.unwrap();
        assert_eq!(reply.written.len(), 2);
    }

    #[tokio::test]
    async fn get_from_non_holder_reads_a_replica() {
        let (_holders, online) = cluster(5);
        let index = index();
        index.put(10, RECORD, &online).await.unwrap();

        let outsider = (1..=5)
            .find(|id| !index.holders(10).contains(id))
            .unwrap();
        let reply = index.get(10, outsider, &online).await.unwrap();

        assert!(!reply.has_already);
        assert_eq!(reply.value, Some(RECORD));
    }

    #[tokio::test]
    async fn get_by_holder_short_circuits() {
        let (holders, online) = cluster(3);
        let index = index();
        index.put(10, RECORD, &online).await.unwrap();

        let reply = index.get(10, 1, &online).await.unwrap();

        assert!(reply.has_already);
        assert_eq!(reply.value, None);
        assert!(holders.iter().all(|h| h.reads.load(Ordering::SeqCst) == 0));
    }

    #[tokio::test]
    async fn get_survives_an_offline_holder() {
        let (holders, online) = cluster(4);
        let index = index();
        index.put(10, RECORD, &online).await.unwrap();

        let recorded = index.holders(10);
        let outsider = (1..=4).find(|id| !recorded.contains(id)).unwrap();

        // First holder leaves the online set entirely
        let still_online: Vec<_> = online
            .iter()
            .filter(|(id, _)| *id != recorded[0])
            .cloned()
            .collect();
        let reply = index.get(10, outsider, &still_online).await.unwrap();
        assert_eq!(reply.value, Some(RECORD));

        // Second holder still listed as online but not answering
        holders[(recorded[1] - 1) as usize]
            .down
            .store(true, Ordering::SeqCst);
        let reply = index.get(10, outsider, &still_online).await.unwrap();
        assert_eq!(reply.value, Some(RECORD));
    }

    #[tokio::test]
    async fn get_with_every_holder_offline_is_unavailable() {
        let (_holders, online) = cluster(3);
        let index = index();
        index.put(10, RECORD, &online).await.unwrap();

        let result = index.get(10, 99, &[]).await;
        assert_eq!(result, Err(Rejection::KeyUnavailable { key: 10 }));

        let result = index.get(11, 1, &online).await;
        assert_eq!(result, Err(Rejection::KeyUnavailable { key: 11 }));
    }

    #[tokio::test]
    async fn put_tops_up_after_a_holder_leaves() {
        let (_holders, online) = cluster(5);
        let index = index();
        index.put(10, RECORD, &online).await.unwrap();
        let first = index.holders(10);

        let still_online: Vec<_> = online
            .iter()
            .filter(|(id, _)| *id != first[0])
            .cloned()
            .collect();
        let reply = index.put(10, Stats { kills: 2, deaths: 0 }, &still_online).await.unwrap();

        assert_eq!(reply.written.len(), 3);
        // The departed holder stays recorded; lists only grow
        assert_eq!(index.holders(10).len(), 4);
    }

    #[tokio::test]
    async fn partial_write_failure_is_reported() {
        let (holders, online) = cluster(3);
        holders[2].down.store(true, Ordering::SeqCst);
        let index = index();

        let reply = index.put(10, RECORD, &online).await.unwrap();

        assert_eq!(reply.failed, vec![3]);
        assert_eq!(reply.written.len(), 2);
        assert!(!index.holders(10).contains(&3));
    }

    #[tokio::test]
    async fn hung_holder_does_not_stall_other_keys() {
        let (holders, online) = cluster(2);
        holders[0].hung.store(true, Ordering::SeqCst);
        let index = Arc::new(ReplicaIndex::with_rng(
            1,
            Duration::from_millis(1500),
            ChaCha8Rng::seed_from_u64(7),
        ));

        let hung_online = vec![online[0].clone()];
        let healthy_online = vec![online[1].clone()];

        let stuck = {
            let index = index.clone();
            tokio::spawn(async move { index.put(1, RECORD, &hung_online).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let reply = index.put(2, RECORD, &healthy_online).await.unwrap();
        assert_eq!(reply.written, vec![2]);
        assert!(started.elapsed() < Duration::from_millis(200));

        // The hung write times out on its own and is reported unavailable
        assert_eq!(
            stuck.await.unwrap(),
            Err(Rejection::KeyUnavailable { key: 1 })
        );
    }

    #[test]
    fn seeding_respects_the_replication_factor() {
        let index = index();
        let online: HashSet<PeerId> = [1, 2, 3, 4].into_iter().collect();

        for peer in 1..=4 {
            index.seed(peer, &[10], &online);
        }

        assert_eq!(index.holders(10), vec![1, 2, 3]);
    }
}
