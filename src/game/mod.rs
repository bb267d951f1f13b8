//! Arena rules and per-player records used to vet incoming updates

pub mod bot;

use chrono::{DateTime, Utc};

use crate::protocol::{PeerId, Vec2};

/// Arena bounds, inclusive
pub const MIN_X: f64 = 0.0;
pub const MIN_Y: f64 = 0.0;
pub const MAX_X: f64 = 1024.0;
pub const MAX_Y: f64 = 668.0;

/// Units per second a player may move
pub const PLAYER_SPEED: f64 = 150.0;

/// Slack allowed between a shot's origin and where its shooter was last seen
pub const SHOT_TOLERANCE: f64 = 48.0;

/// Rectangle updates must stay within
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    pub min: Vec2,
    pub max: Vec2,
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            min: Vec2::new(MIN_X, MIN_Y),
            max: Vec2::new(MAX_X, MAX_Y),
        }
    }
}

impl Arena {
    pub fn contains(&self, pos: Vec2) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x) && (self.min.y..=self.max.y).contains(&pos.y)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new((self.min.x + self.max.x) / 2.0, (self.min.y + self.max.y) / 2.0)
    }
}

/// Last accepted state of a player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerRecord {
    pub player_id: PeerId,
    pub time: DateTime<Utc>,
    pub pos: Vec2,
    pub angle: f64,
}

impl PlayerRecord {
    pub fn new(player_id: PeerId, time: DateTime<Utc>, pos: Vec2, angle: f64) -> Self {
        Self {
            player_id,
            time,
            pos,
            angle,
        }
    }

    /// Seconds between the record and `time`, never negative
    fn elapsed_secs(&self, time: DateTime<Utc>) -> f64 {
        let dt = time - self.time;
        (dt.num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6).max(0.0)
    }

    /// Whether the player could have reached `pos` by `time`.
    ///
    /// Updates may arrive out of order, so the bound is twice the player's
    /// top speed over the elapsed time.
    pub fn can_reach(&self, pos: Vec2, time: DateTime<Utc>) -> bool {
        let dt = self.elapsed_secs(time);
        self.pos.distance(pos) <= 2.0 * PLAYER_SPEED * dt
    }

    /// Whether a shot from `origin` at `time` plausibly came from this player
    pub fn could_fire_from(&self, origin: Vec2, time: DateTime<Utc>) -> bool {
        let dt = self.elapsed_secs(time);
        self.pos.distance(origin) <= SHOT_TOLERANCE + 2.0 * PLAYER_SPEED * dt
    }

    pub fn moved_to(&mut self, pos: Vec2, angle: f64, time: DateTime<Utc>) {
        self.pos = pos;
        self.angle = angle;
        if time > self.time {
            self.time = time;
        }
    }
}
