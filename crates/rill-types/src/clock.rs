//! Wall-clock contract.
//!
//! Session expiry only needs wall-clock time; monotonicity is not required.
//! Providers take the clock as a trait object so tests can substitute a
//! fixed or steppable clock.

use std::sync::Mutex;

use time::OffsetDateTime;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Default [`Clock`]: the system wall clock in UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually steppable clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_recent() {
        let now = SystemClock.now();
        // After 2020-01-01.
        assert!(now.unix_timestamp() > 1_577_836_800);
    }

    #[test]
    fn manual_clock_advances() {
        let start = OffsetDateTime::from_unix_timestamp(1_000_000).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(time::Duration::seconds(90));
        assert_eq!(clock.now(), start + time::Duration::seconds(90));
    }
}
