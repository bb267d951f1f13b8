//! Peer-state updates exchanged between peers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PeerId;

/// A point in arena coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Vec2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Angle in radians of the vector pointing from `self` to `target`
    pub fn angle_to(self, target: Vec2) -> f64 {
        (target.y - self.y).atan2(target.x - self.x)
    }
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateKind {
    /// Absolute position and aim of the sender's player
    Position { pos: Vec2, angle: f64 },
    /// A shot fired from `origin` towards `angle`
    Fire { origin: Vec2, angle: f64 },
    /// The player died; `cause` is the peer whose shot killed it
    Dead { cause: PeerId },
}

/// Timestamped, nonced event about one player
///
/// `time` is the sender's session clock reading and `nonce` only serves
/// deduplication. Updates carry absolute state, so receivers may apply them
/// out of send order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub time: DateTime<Utc>,
    pub nonce: u64,
    pub player_id: PeerId,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

impl Update {
    pub fn new(player_id: PeerId, kind: UpdateKind, time: DateTime<Utc>) -> Self {
        Self {
            time,
            nonce: rand::random(),
            player_id,
            kind,
        }
    }

    pub fn position(player_id: PeerId, pos: Vec2, angle: f64, time: DateTime<Utc>) -> Self {
        Self::new(player_id, UpdateKind::Position { pos, angle }, time)
    }

    pub fn fire(player_id: PeerId, origin: Vec2, angle: f64, time: DateTime<Utc>) -> Self {
        Self::new(player_id, UpdateKind::Fire { origin, angle }, time)
    }

    pub fn dead(victim: PeerId, cause: PeerId, time: DateTime<Utc>) -> Self {
        Self::new(victim, UpdateKind::Dead { cause }, time)
    }
}
