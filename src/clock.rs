//! Wall-clock abstraction.
//!
//! The original C tracks an `abs_time_t` sampled via `get_sys_time()`
//! everywhere a token bucket or RTCP schedule needs "now". A trait keeps
//! [`token_bucket::TokenBucket`](crate::token_bucket::TokenBucket) and
//! [`rtcp::session::Session`](crate::rtcp::session::Session) deterministic
//! under test without threading a `now: Instant` parameter through every
//! call site twice.

use std::time::{Duration, Instant};

/// Source of monotonic time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real, OS-backed clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances when told to. Used by unit tests that need
/// to assert exact token-bucket credit amounts without sleeping.
#[derive(Debug)]
pub struct TestClock {
    now: parking_lot::Mutex<Instant>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, d: Duration) {
        *self.now.lock() += d;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
