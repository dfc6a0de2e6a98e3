//! Wall-clock abstraction.
//!
//! The scheduler aligns fetches to wall-clock minutes and the sensor lifecycle
//! compares against unix time, so both read time through [`Clock`]. Tests use
//! [`MockClock`], which advances together with tokio's paused time.

use std::sync::Mutex;

use time::OffsetDateTime;
use tokio::time::Instant;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock anchored at a fixed wall-clock time that moves with
/// [`tokio::time::Instant`].
///
/// Under `#[tokio::test(start_paused = true)]`, `tokio::time::advance` moves
/// this clock forward by the same amount. [`MockClock::jump`] shifts it
/// without moving tokio time.
#[derive(Debug)]
pub struct MockClock {
    anchor: Mutex<(OffsetDateTime, Instant)>,
}

impl MockClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            anchor: Mutex::new((start, Instant::now())),
        }
    }

    /// Move the wall clock by `by` without sleeping.
    pub fn jump(&self, by: time::Duration) {
        if let Ok(mut anchor) = self.anchor.lock() {
            anchor.0 += by;
        }
    }
}

impl Clock for MockClock {
    fn now(&self) -> OffsetDateTime {
        match self.anchor.lock() {
            Ok(anchor) => anchor.0 + anchor.1.elapsed(),
            Err(poisoned) => {
                let anchor = poisoned.into_inner();
                anchor.0 + anchor.1.elapsed()
            }
        }
    }
}
