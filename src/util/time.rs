//! Time utilities: the session clock and uptime tracking

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

/// Wall clock shifted by an atomically updated signed offset.
///
/// Every process in a session owns exactly one of these. The directory moves
/// offsets around during clock-sync rounds; everything that stamps or fences
/// updates reads `now()`.
#[derive(Debug, Default)]
pub struct SessionClock {
    offset_nanos: AtomicI64,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session time (local wall clock plus offset)
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset()
    }

    pub fn offset(&self) -> Duration {
        nanos_to_duration(self.offset_nanos.load(Ordering::Acquire))
    }

    pub fn set_offset(&self, offset: Duration) {
        self.offset_nanos
            .store(duration_to_nanos(offset), Ordering::Release);
    }
}

/// Convert a signed duration to nanoseconds, saturating at the i64 range
pub fn duration_to_nanos(d: Duration) -> i64 {
    d.num_nanoseconds()
        .unwrap_or(if d < Duration::zero() { i64::MIN } else { i64::MAX })
}

pub fn nanos_to_duration(nanos: i64) -> Duration {
    Duration::nanoseconds(nanos)
}

/// Process start time for uptime tracking
static PROCESS_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize process start time (call once at startup)
pub fn init_process_time() {
    PROCESS_START.get_or_init(Instant::now);
}

/// Get process uptime in seconds
pub fn uptime_secs() -> u64 {
    PROCESS_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}
