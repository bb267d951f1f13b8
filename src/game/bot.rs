//! Headless bot player
//!
//! Wanders the arena, changes direction now and then, and fires at a random
//! known player. Moves go through the same update bus as remote updates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::Arena;
use crate::bus::UpdateBus;
use crate::peer::PeerService;
use crate::protocol::{PeerId, Update, Vec2};

pub const MOVE_INTERVAL: Duration = Duration::from_millis(70);
pub const DIRECTION_CHANGE_INTERVAL: Duration = Duration::from_millis(850);
pub const SHOT_INTERVAL: Duration = Duration::from_millis(800);
/// Per-axis speed; above a player's because the bot only moves every tick
pub const BOT_SPEED: f64 = 185.0;

/// Result of one bot tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotMove {
    pub pos: Vec2,
    pub angle: f64,
    pub fire: bool,
}

pub struct BotBrain {
    arena: Arena,
    pos: Vec2,
    angle: f64,
    velocity: Vec2,
    since_turn: Duration,
    since_shot: Duration,
    rng: ChaCha8Rng,
}

impl BotBrain {
    pub fn new(arena: Arena, rng: ChaCha8Rng) -> Self {
        Self {
            pos: arena.center(),
            arena,
            angle: 0.0,
            velocity: Vec2::default(),
            // Pick a heading on the first tick
            since_turn: DIRECTION_CHANGE_INTERVAL,
            since_shot: Duration::ZERO,
            rng,
        }
    }

    pub fn pos(&self) -> Vec2 {
        self.pos
    }

    fn random_axis(&mut self) -> f64 {
        self.rng.gen_range(-1.0..=1.0) * BOT_SPEED
    }

    /// Advance by `dt`; `targets` are the other players currently known
    pub fn step(&mut self, dt: Duration, targets: &[(PeerId, Vec2)]) -> BotMove {
        self.since_turn += dt;
        self.since_shot += dt;

        if self.since_turn >= DIRECTION_CHANGE_INTERVAL {
            self.velocity = Vec2::new(self.random_axis(), self.random_axis());
            self.since_turn = Duration::ZERO;
        }

        // Each axis only moves if it stays inside the arena
        let secs = dt.as_secs_f64();
        let next = Vec2::new(
            self.pos.x + self.velocity.x * secs,
            self.pos.y + self.velocity.y * secs,
        );
        if (self.arena.min.x..=self.arena.max.x).contains(&next.x) {
            self.pos.x = next.x;
        }
        if (self.arena.min.y..=self.arena.max.y).contains(&next.y) {
            self.pos.y = next.y;
        }

        let mut fire = false;
        if self.since_shot > SHOT_INTERVAL && !targets.is_empty() {
            let (_, target) = targets[self.rng.gen_range(0..targets.len())];
            self.angle = self.pos.angle_to(target);
            self.since_shot = Duration::ZERO;
            fire = true;
        }

        BotMove {
            pos: self.pos,
            angle: self.angle,
            fire,
        }
    }
}

/// Drive the local player forever
pub async fn run(player_id: PeerId, service: Arc<PeerService>, bus: Arc<UpdateBus>) {
    let mut brain = BotBrain::new(Arena::default(), ChaCha8Rng::from_entropy());
    let mut interval = tokio::time::interval(MOVE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = Instant::now();

    info!(player_id, "Bot started");
    loop {
        interval.tick().await;
        let now = Instant::now();
        let dt = now - last;
        last = now;

        // Stand in for the render loop
        let heard = bus.drain().len();

        let targets: Vec<(PeerId, Vec2)> = bus
            .known_players()
            .into_iter()
            .filter(|(id, _)| *id != player_id)
            .collect();
        let step = brain.step(dt, &targets);

        let time = bus.clock().now();
        service.ingest(Update::position(player_id, step.pos, step.angle, time));
        if step.fire {
            let verdict = service.ingest(Update::fire(player_id, step.pos, step.angle, time));
            debug!(player_id, angle = step.angle, ?verdict, heard, "Bot fired");
        }
    }
}
