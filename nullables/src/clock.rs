//! Nullable clock: deterministic time for testing.

use std::sync::atomic::{AtomicU64, Ordering};
use troof_types::{Clock, Timestamp};

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to. Thread-safe so it can be shared
/// with a hub running on tokio's multi-threaded runtime.
pub struct NullClock {
    current: AtomicU64,
}

impl NullClock {
    pub fn new(initial_millis: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_millis),
        }
    }

    /// Advance time by a number of milliseconds.
    pub fn advance(&self, millis: u64) {
        self.current.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set(&self, millis: u64) {
        self.current.store(millis, Ordering::SeqCst);
    }
}

impl Clock for NullClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_only_on_request() {
        let clock = NullClock::new(1_000);
        assert_eq!(clock.now(), Timestamp::new(1_000));
        clock.advance(250);
        assert_eq!(clock.now(), Timestamp::new(1_250));
        clock.set(5);
        assert_eq!(clock.now(), Timestamp::new(5));
    }
}
