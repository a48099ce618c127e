//! Rate limiting for progress events.

use std::time::{Duration, Instant};

/// Integer percentage of `done` over `total`, clamped to 100.
///
/// `total == 0` yields 0.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (done as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// Decides which download progress ticks become events.
///
/// A tick is emitted when its integer percentage differs from the last
/// emitted one, or when at least `interval` passed since the last emission.
/// A clock reading earlier than the last emission counts as no time passed.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_progress: Option<u8>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_progress: None,
        }
    }

    /// Record a tick at `now`; returns whether it should be emitted.
    pub fn should_emit(&mut self, progress: u8, now: Instant) -> bool {
        let changed = self.last_progress != Some(progress);
        let elapsed = self
            .last_emit
            .map_or(self.interval, |last| now.saturating_duration_since(last));

        if changed || elapsed >= self.interval {
            self.last_progress = Some(progress);
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}

/// Lets an event through at most once per interval.
///
/// The first call always passes; later calls pass once strictly more than
/// `interval` has elapsed since the last pass.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    interval: Duration,
    last: Option<Instant>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        let pass = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        };
        if pass {
            self.last = Some(now);
        }
        pass
    }
}
