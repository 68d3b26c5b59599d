//! Wall-clock abstraction.
//!
//! Cooldowns, breaker timeouts and refresh timestamps all read the current time
//! through a [`Clock`] so they can be driven deterministically in tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
///
/// Clones share the same underlying time, so a clone handed to the engine
/// can be advanced from the test body.
///
/// # Examples
///
/// ```
/// use source_refresh::clock::{Clock, ManualClock};
/// use chrono::Duration;
///
/// let clock = ManualClock::at_unix(1_000);
/// clock.advance(Duration::seconds(30));
/// assert_eq!(clock.now().timestamp(), 1_030);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Creates a clock frozen at the given Unix timestamp (seconds).
    pub fn at_unix(seconds: i64) -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default())
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared clock handle used across the engine.
pub type SharedClock = Arc<dyn Clock>;
