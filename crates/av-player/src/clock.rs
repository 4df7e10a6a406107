//! Host clock used to pace video against the audio output.
//!
//! The audio callback stamps the session start with [`HostClock::now`]; the display worker
//! measures elapsed time against the same clock, so both sides must share one instance.

use std::time::{Duration, Instant};

pub trait HostClock: Send + Sync {
    /// Time since an arbitrary, fixed origin. Never decreases.
    fn now(&self) -> Duration;

    /// Block the calling thread for `d`.
    fn sleep(&self, d: Duration);
}

/// [`HostClock`] backed by [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}
