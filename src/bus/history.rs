//! Recently seen update nonces, age-fenced

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

/// Hard cap on remembered nonces, in case the fence stops advancing
const MAX_ENTRIES: usize = 8192;

#[derive(Debug, Default)]
pub struct RecentHistory {
    order: VecDeque<(DateTime<Utc>, u64)>,
    seen: HashSet<u64>,
}

impl RecentHistory {
    /// Forget entries stamped before `fence`, oldest first. Stops at the first
    /// entry inside the window, mirroring arrival order.
    pub fn prune(&mut self, fence: DateTime<Utc>) {
        while let Some((time, nonce)) = self.order.front().copied() {
            if time >= fence && self.order.len() <= MAX_ENTRIES {
                break;
            }
            self.order.pop_front();
            self.seen.remove(&nonce);
        }
    }

    /// Remember `nonce`; false if it was already in the window
    pub fn insert(&mut self, time: DateTime<Utc>, nonce: u64) -> bool {
        if !self.seen.insert(nonce) {
            return false;
        }
        self.order.push_back((time, nonce));
        true
    }

    pub fn contains(&self, nonce: u64) -> bool {
        self.seen.contains(&nonce)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
