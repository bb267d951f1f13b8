//! Rate limiting for inbound peer updates

use dashmap::DashMap;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::protocol::PeerId;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// One limiter per update author, created on first contact
pub struct PlayerRateLimiter {
    per_second: u32,
    limiters: DashMap<PeerId, Arc<Limiter>>,
}

impl PlayerRateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second,
            limiters: DashMap::new(),
        }
    }

    /// Check if another update by `player` is allowed (returns true if allowed)
    pub fn check(&self, player: PeerId) -> bool {
        let limiter = self
            .limiters
            .entry(player)
            .or_insert_with(|| create_limiter(self.per_second))
            .clone();
        limiter.check().is_ok()
    }
}
