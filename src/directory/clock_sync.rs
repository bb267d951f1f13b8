//! Clock synchronisation rounds (Cristian's algorithm, averaged)
//!
//! The directory asks every connected peer for its session time, estimates
//! each peer's clock from the round trip, and moves everyone (itself
//! included) to the mean. Peers that do not answer within the timeout are
//! skipped for the round.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::protocol::PeerId;
use crate::rpc::{with_timeout, PeerApi};
use crate::util::time::{nanos_to_duration, SessionClock};

/// One peer's measured clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub peer_id: PeerId,
    /// Peer session clock minus directory session clock
    pub relative: Duration,
    /// Offset the peer reported applying to its own wall clock
    pub reported_offset: Duration,
}

/// Offsets to apply at the end of a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockPlan {
    /// New directory offset: mean of all session clocks against the
    /// directory's wall clock
    pub mean: Duration,
    /// New absolute offset per peer
    pub peer_offsets: Vec<(PeerId, Duration)>,
}

/// Average the directory's own offset (weight 1) with every sampled peer.
///
/// Offsets are compared in the directory's wall-clock frame: a peer's clock
/// sits at `directory_offset + relative` from it. Each peer is shifted by the
/// distance to the mean on top of its current offset, so `SetOffset` stays an
/// absolute store on the receiving side.
pub fn plan_offsets(directory_offset: Duration, samples: &[ClockSample]) -> ClockPlan {
    let total = samples
        .iter()
        .fold(directory_offset, |acc, s| acc + directory_offset + s.relative);
    let mean = total / (samples.len() as i32 + 1);

    let peer_offsets = samples
        .iter()
        .map(|s| {
            let peer_clock = directory_offset + s.relative;
            (s.peer_id, s.reported_offset + (mean - peer_clock))
        })
        .collect();

    ClockPlan { mean, peer_offsets }
}

/// Result of one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub mean: Duration,
    /// Peers that accepted their new offset
    pub adjusted: Vec<(PeerId, Duration)>,
    /// Peers skipped because a call failed or timed out
    pub skipped: Vec<PeerId>,
}

/// Run one round against `targets`.
///
/// No directory lock is held here; the caller snapshots the handles first
/// and writes back the adjusted offsets afterwards.
pub async fn run_round(
    clock: &SessionClock,
    targets: Vec<(PeerId, Arc<dyn PeerApi>)>,
    timeout: StdDuration,
) -> RoundOutcome {
    let mut samples = Vec::with_capacity(targets.len());
    let mut skipped = Vec::new();

    for (peer_id, handle) in &targets {
        debug!(peer_id = *peer_id, "Requesting peer time");
        let t0 = clock.now();
        match with_timeout(timeout, handle.time_request()).await {
            Ok(reply) => {
                let t1 = clock.now();
                let estimate = reply.time + (t1 - t0) / 2;
                samples.push(ClockSample {
                    peer_id: *peer_id,
                    relative: estimate - t1,
                    reported_offset: nanos_to_duration(reply.offset_nanos),
                });
            }
            Err(e) => {
                warn!(peer_id = *peer_id, error = %e, "Time request failed, skipping peer this round");
                skipped.push(*peer_id);
            }
        }
    }

    let plan = plan_offsets(clock.offset(), &samples);
    let mut adjusted = Vec::with_capacity(plan.peer_offsets.len());

    for (peer_id, offset) in plan.peer_offsets {
        let Some((_, handle)) = targets.iter().find(|(id, _)| *id == peer_id) else {
            continue;
        };
        debug!(peer_id, offset_ms = offset.num_milliseconds(), "Telling peer to set offset");
        match with_timeout(timeout, handle.set_offset(offset)).await {
            Ok(()) => adjusted.push((peer_id, offset)),
            Err(e) => {
                warn!(peer_id, error = %e, "SetOffset failed, skipping peer this round");
                skipped.push(peer_id);
            }
        }
    }

    clock.set_offset(plan.mean);
    info!(
        mean_ms = plan.mean.num_milliseconds(),
        adjusted = adjusted.len(),
        skipped = skipped.len(),
        "Clock sync round complete"
    );

    RoundOutcome {
        mean: plan.mean,
        adjusted,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FailureNotice, PeerInfo, StatKey, Stats, TimeReply, Update};
    use crate::rpc::RpcError;
    use crate::util::time::duration_to_nanos;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// A peer whose wall clock runs `skew` ahead of the real one
    struct SkewedPeer {
        skew: Duration,
        offset: Mutex<Duration>,
        hang: bool,
    }

    impl SkewedPeer {
        fn new(skew_ms: i64, offset_ms: i64) -> Arc<Self> {
            Arc::new(Self {
                skew: Duration::milliseconds(skew_ms),
                offset: Mutex::new(Duration::milliseconds(offset_ms)),
                hang: false,
            })
        }

        fn session_skew(&self) -> Duration {
            self.skew + *self.offset.lock()
        }
    }

    #[async_trait]
    impl PeerApi for SkewedPeer {
        async fn time_request(&self) -> Result<TimeReply, RpcError> {
            if self.hang {
                futures::future::pending::<()>().await;
            }
            let offset = *self.offset.lock();
            Ok(TimeReply {
                time: Utc::now() + self.skew + offset,
                offset_nanos: duration_to_nanos(offset),
            })
        }

        async fn set_offset(&self, offset: Duration) -> Result<(), RpcError> {
            *self.offset.lock() = offset;
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
            Err(crate::protocol::Rejection::KeyUnavailable { key }.into())
        }

        async fn kv_put(&self, _key: StatKey, _value: Stats) -> Result<(), RpcError> {
            Ok(())
        }
    }

    fn close(a: Duration, b: Duration) -> bool {
        (a - b).num_milliseconds().abs() <= 50
    }

    #[test]
    fn plan_moves_everyone_to_the_mean() {
        let samples = [
            ClockSample {
                peer_id: 1,
                relative: Duration::milliseconds(300),
                reported_offset: Duration::zero(),
            },
            ClockSample {
                peer_id: 2,
                relative: Duration::milliseconds(-600),
                reported_offset: Duration::milliseconds(100),
            },
        ];

        let plan = plan_offsets(Duration::zero(), &samples);

        // mean(0, 300, -600) = -100
        assert_eq!(plan.mean, Duration::milliseconds(-100));
        assert_eq!(
            plan.peer_offsets,
            vec![
                (1, Duration::milliseconds(-400)),
                (2, Duration::milliseconds(600)),
            ]
        );
    }

    #[test]
    fn plan_accounts_for_the_directory_offset() {
        let samples = [ClockSample {
            peer_id: 1,
            relative: Duration::zero(),
            reported_offset: Duration::zero(),
        }];

        let plan = plan_offsets(Duration::milliseconds(200), &samples);

        // Both clocks already agree at +200 against the directory wall clock
        assert_eq!(plan.mean, Duration::milliseconds(200));
        assert_eq!(plan.peer_offsets, vec![(1, Duration::zero())]);
    }

    #[test]
    fn plan_without_samples_keeps_the_directory_offset() {
        let plan = plan_offsets(Duration::milliseconds(-30), &[]);
        assert_eq!(plan.mean, Duration::milliseconds(-30));
        assert!(plan.peer_offsets.is_empty());
    }

    #[tokio::test]
    async fn round_converges_all_clocks_to_the_mean() {
        let clock = SessionClock::new();
        let a = SkewedPeer::new(900, 0);
        let b = SkewedPeer::new(-300, 0);
        let c = SkewedPeer::new(0, 200);

        let targets: Vec<(PeerId, Arc<dyn PeerApi>)> = vec![
            (1, a.clone() as Arc<dyn PeerApi>),
            (2, b.clone() as Arc<dyn PeerApi>),
            (3, c.clone() as Arc<dyn PeerApi>),
        ];

        let outcome = run_round(&clock, targets, StdDuration::from_secs(1)).await;

        // mean(0, 900, -300, 200) = 200
        assert!(close(outcome.mean, Duration::milliseconds(200)));
        assert!(close(clock.offset(), outcome.mean));
        for peer in [&a, &b, &c] {
            assert!(close(peer.session_skew(), clock.offset()));
        }
        assert!(outcome.skipped.is_empty());
    }

    #[tokio::test]
    async fn hung_peers_are_skipped() {
        let clock = SessionClock::new();
        let healthy = SkewedPeer::new(400, 0);
        let hung = Arc::new(SkewedPeer {
            skew: Duration::zero(),
            offset: Mutex::new(Duration::zero()),
            hang: true,
        });

        let targets: Vec<(PeerId, Arc<dyn PeerApi>)> = vec![
            (1, hung as Arc<dyn PeerApi>),
            (2, healthy.clone() as Arc<dyn PeerApi>),
        ];

        let outcome = run_round(&clock, targets, StdDuration::from_millis(50)).await;

        assert_eq!(outcome.skipped, vec![1]);
        assert!(close(outcome.mean, Duration::milliseconds(200)));
        assert!(close(healthy.session_skew(), clock.offset()));
    }
}
