//! Time source shared by the hit queue and the synchronizer.
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Source of hit timestamps and session cutoffs.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// A clock that never returns the same instant twice within a process.
///
/// Wall-clock time is used as long as it moves forward; otherwise the previous value is advanced
/// by one microsecond. This keeps hit ordering stable when several hits are created within the
/// resolution of the system clock or when the wall clock steps backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    /// Create a new clock.
    pub fn new() -> MonotonicClock {
        MonotonicClock::default()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now();
        let wall_micros = wall.timestamp_micros();
        let advance = |last: i64| wall_micros.max(last.saturating_add(1));

        // fetch_update with a closure that always returns Some cannot fail.
        let previous = match self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(advance(last)))
        {
            Ok(previous) | Err(previous) => previous,
        };

        DateTime::from_timestamp_micros(advance(previous)).unwrap_or(wall)
    }
}
