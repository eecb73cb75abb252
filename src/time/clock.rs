//! Clock sources.
//!
//! Every timer in the crate reads time through [`TimeSource`], so the same
//! code runs against the wall clock in production and a [`VirtualClock`]
//! in tests.

use crate::types::Time;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of the current time.
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Monotonic wall clock.
///
/// The epoch is the instant the clock was created, shifted by an optional
/// starting offset.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
    offset: Time,
}

impl WallClock {
    /// Creates a wall clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Time::ZERO)
    }

    /// Creates a wall clock that reads `start` at creation.
    #[must_use]
    pub fn starting_at(start: Time) -> Self {
        Self {
            epoch: Instant::now(),
            offset: start,
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        self.offset.saturating_add(self.epoch.elapsed())
    }
}

/// Manually driven clock for deterministic tests.
///
/// # Example
///
/// ```
/// use weft::time::{TimeSource, VirtualClock};
/// use weft::types::Time;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance(1_000_000_000);
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock at time zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Creates a virtual clock at `time`.
    #[must_use]
    pub const fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by `nanos`, saturating at [`Time::MAX`].
    pub fn advance(&self, nanos: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Moves time forward to `time`; earlier targets are ignored.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}
