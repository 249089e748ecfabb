//! Monotonic time source

use std::time::Duration;
use tf_core::Timestamp;
use tokio::time::Instant;

/// Milliseconds elapsed since the clock was created
///
/// Backed by [`tokio::time::Instant`], so paused test time drives it.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        let millis = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timestamp::from_millis(millis)
    }

    /// The instant a timestamp of this clock falls on
    pub fn instant_at(&self, at: Timestamp) -> Instant {
        self.origin + Duration::from_millis(at.as_millis())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
