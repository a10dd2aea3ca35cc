// Injected time sources
//
// The time reference needs two clocks: a monotonic one that is immune to
// wall-clock adjustment (for advancing experiment time) and a wall clock
// (for gap accounting and reconstruction from persisted sessions). Both are
// behind a trait so tests can drive time by hand.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::time::Instant;

/// Source of monotonic uptime and wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Monotonic time in seconds. Only differences are meaningful.
    fn monotonic(&self) -> f64;

    /// Current wall-clock time.
    fn wall(&self) -> DateTime<Utc>;
}

/// Production clock: `std::time::Instant` anchored at creation for the
/// monotonic part, `chrono::Utc::now()` for the wall-clock part.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn monotonic(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests. Both clocks advance together through
/// `advance`; `skew_wall` moves only the wall clock, which is how tests
/// model wall-clock adjustments that a monotonic clock must not see.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

struct ManualState {
    monotonic: f64,
    wall: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                monotonic: 0.0,
                wall: start,
            }),
        }
    }

    /// Advance both clocks by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state.lock();
        state.monotonic += seconds;
        state.wall += Duration::microseconds((seconds * 1e6).round() as i64);
    }

    /// Move only the wall clock by `seconds` (may be negative).
    pub fn skew_wall(&self, seconds: f64) {
        let mut state = self.state.lock();
        state.wall += Duration::microseconds((seconds * 1e6).round() as i64);
    }
}

impl TimeSource for ManualClock {
    fn monotonic(&self) -> f64 {
        self.state.lock().monotonic
    }

    fn wall(&self) -> DateTime<Utc> {
        self.state.lock().wall
    }
}

/// Seconds between two wall-clock stamps as f64.
pub(crate) fn wall_seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_microseconds().map(|us| us as f64 * 1e-6).unwrap_or_else(|| {
        // Microsecond count overflows past ~292k years of span.
        (later - earlier).num_milliseconds() as f64 * 1e-3
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(2.5);
        assert!((clock.monotonic() - 2.5).abs() < 1e-9);
        assert!((wall_seconds_between(start, clock.wall()) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn skew_moves_only_wall() {
        let clock = ManualClock::new(Utc::now());
        let before = clock.monotonic();
        clock.skew_wall(100.0);
        assert_eq!(clock.monotonic(), before);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
    }
}
