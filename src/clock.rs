// src/clock.rs - Injectable time source
//
// Debounce deadlines, poll intervals and COV lifetimes are all measured
// against a `Clock`, never against the wall clock directly, so tests can
// warp time deterministically.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
///
/// Clones share the same time.
///
/// # Examples
///
/// ```rust
/// use bacnet_events::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::default();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(3));
/// assert_eq!((clock.now() - start).num_seconds(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }

    /// Jump to an absolute time; moving backwards is ignored
    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock();
        if at > *now {
            *now = at;
        }
    }
}

impl Default for ManualClock {
    /// Starts on a fixed Monday noon so time-window tests are reproducible
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_millis(1500));
        assert_eq!((clock.now() - start).num_milliseconds(), 1500);
    }

    #[test]
    fn test_manual_clock_never_moves_backwards() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.set(start - chrono::Duration::seconds(10));
        assert_eq!(clock.now(), start);
    }
}
