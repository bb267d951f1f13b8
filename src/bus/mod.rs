//! Update bus - vets incoming peer updates before anything acts on them
//!
//! Every update (local or remote) is submitted here. Accepted updates are
//! queued for the local game loop (`drain`) and handed to the outgoing
//! channel so they get rebroadcast. Receivers dedup by nonce, which is what
//! stops the rebroadcast from looping.

mod history;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::game::{Arena, PlayerRecord};
use crate::protocol::{PeerId, Update, UpdateKind, Vec2};
use crate::util::time::SessionClock;

use history::RecentHistory;

/// Accepted updates kept for the game loop before the oldest are dropped
const MAX_PENDING: usize = 1024;

/// Outcome of submitting an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Stamped before `now + time_delta`
    Stale,
    /// Nonce already seen within the history window
    Duplicate,
    OutOfBounds,
    ImplausibleMove,
    UnknownShooter,
    ImplausibleShot,
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }
}

#[derive(Default)]
struct BusState {
    history: RecentHistory,
    players: HashMap<PeerId, PlayerRecord>,
    pending: VecDeque<Update>,
}

pub struct UpdateBus {
    clock: Arc<SessionClock>,
    /// Negative staleness fence relative to now
    time_delta: Duration,
    arena: Arena,
    state: Mutex<BusState>,
    outgoing: mpsc::Sender<Update>,
}

impl UpdateBus {
    /// Create a bus and the receiving end of its outgoing queue
    pub fn new(
        clock: Arc<SessionClock>,
        time_delta: Duration,
        outgoing_capacity: usize,
    ) -> (Self, mpsc::Receiver<Update>) {
        let (outgoing, rx) = mpsc::channel(outgoing_capacity);
        let bus = Self {
            clock,
            time_delta,
            arena: Arena::default(),
            state: Mutex::new(BusState::default()),
            outgoing,
        };
        (bus, rx)
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn submit(&self, update: Update) -> Verdict {
        let fence = self.clock.now() + self.time_delta;
        if update.time < fence {
            trace!(nonce = update.nonce, player_id = update.player_id, "Dropping stale update");
            return Verdict::Stale;
        }

        {
            let mut state = self.state.lock();
            state.history.prune(fence);
            if !state.history.insert(update.time, update.nonce) {
                return Verdict::Duplicate;
            }

            let verdict = self.vet(&mut state.players, &update);
            if !verdict.is_accepted() {
                debug!(
                    player_id = update.player_id,
                    nonce = update.nonce,
                    ?verdict,
                    "Rejected update"
                );
                return verdict;
            }

            if state.pending.len() >= MAX_PENDING {
                state.pending.pop_front();
            }
            state.pending.push_back(update);
        }

        if let Err(e) = self.outgoing.try_send(update) {
            warn!(nonce = update.nonce, error = %e, "Outgoing update queue full, not rebroadcasting");
        }
        Verdict::Accepted
    }

    /// Check an update against the player records, applying it if plausible
    fn vet(&self, players: &mut HashMap<PeerId, PlayerRecord>, update: &Update) -> Verdict {
        match update.kind {
            UpdateKind::Position { pos, angle } => {
                if !self.arena.contains(pos) {
                    return Verdict::OutOfBounds;
                }
                match players.get_mut(&update.player_id) {
                    Some(record) => {
                        if !record.can_reach(pos, update.time) {
                            return Verdict::ImplausibleMove;
                        }
                        record.moved_to(pos, angle, update.time);
                    }
                    None => {
                        debug!(player_id = update.player_id, "Heard of new player");
                        players.insert(
                            update.player_id,
                            PlayerRecord::new(update.player_id, update.time, pos, angle),
                        );
                    }
                }
                Verdict::Accepted
            }
            UpdateKind::Fire { origin, .. } => match players.get(&update.player_id) {
                None => Verdict::UnknownShooter,
                Some(record) if !record.could_fire_from(origin, update.time) => {
                    Verdict::ImplausibleShot
                }
                Some(_) => Verdict::Accepted,
            },
            UpdateKind::Dead { .. } => {
                players.remove(&update.player_id);
                Verdict::Accepted
            }
        }
    }

    /// Whether `nonce` is still in the recent-history window
    pub fn has_seen(&self, nonce: u64) -> bool {
        self.state.lock().history.contains(nonce)
    }

    /// Take every accepted update not yet consumed by the game loop
    pub fn drain(&self) -> Vec<Update> {
        self.state.lock().pending.drain(..).collect()
    }

    /// Players with a live record and their last known positions
    pub fn known_players(&self) -> Vec<(PeerId, Vec2)> {
        let mut players: Vec<(PeerId, Vec2)> = self
            .state
            .lock()
            .players
            .values()
            .map(|r| (r.player_id, r.pos))
            .collect();
        players.sort_by_key(|(id, _)| *id);
        players
    }
}
