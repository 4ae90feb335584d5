//! `(rate, burst)` token bucket policer.
//!
//! Ported 1:1 from `examples/original_source/utils/vqe_token_bucket.c` /
//! `include/utils/vqe_token_bucket.h`. The numeric bounds and the
//! "advance the clock by only whole replenish periods, not to `now`"
//! detail both come from that source; spec.md §4.5/§8 state the resulting
//! invariants but not this implementation detail, and getting it wrong
//! (advancing `last_credit_time` all the way to `now`) silently loses
//! fractional tokens on every credit.

use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::{bail, ErrorInt};

/// Token bucket refill rate upper bound (tokens/second).
pub const RATE_MAX: u32 = 150_000;
/// Token bucket depth upper bound (tokens).
pub const BURST_MAX: u32 = u16::MAX as u32;
/// Token quantum upper bound (tokens per credit).
pub const QUANTUM_MAX: u32 = 4096;

/// A `(rate, burst, quantum)` token bucket.
///
/// Not thread-safe by itself (matching the C API's documented contract);
/// callers hold this behind the same coarse lock that protects the rest
/// of a channel's dataplane state (spec.md §5).
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: u32,
    burst: u32,
    quantum: u32,
    /// Microseconds needed to earn one quantum; 0 means "never replenish"
    /// (only possible when `rate == 0`).
    replenish_period_us: u64,
    last_credit: Instant,
    tokens: u32,
}

impl TokenBucket {
    /// Creates a bucket, initially full, rejecting out-of-range
    /// parameters. `quantum == 0` is invalid; use
    /// [`TokenBucket::new_simple`] for the common `quantum == 1` case.
    pub fn new(
        rate: u32,
        burst: u32,
        quantum: u32,
        now: Instant,
    ) -> Result<TokenBucket, crate::Error> {
        if rate > RATE_MAX {
            bail!(ErrorInt::InvalidArgs {
                description: format!("token bucket rate {rate} exceeds max {RATE_MAX}")
            });
        }
        if burst > BURST_MAX {
            bail!(ErrorInt::InvalidArgs {
                description: format!("token bucket burst {burst} exceeds max {BURST_MAX}")
            });
        }
        if quantum == 0 || quantum > QUANTUM_MAX {
            bail!(ErrorInt::InvalidArgs {
                description: format!("token bucket quantum {quantum} out of range")
            });
        }
        let replenish_period_us = if rate == 0 {
            0
        } else {
            (quantum as u64) * 1_000_000 / rate as u64
        };
        Ok(TokenBucket {
            rate,
            burst,
            quantum,
            replenish_period_us,
            last_credit: now,
            tokens: burst,
        })
    }

    pub fn new_simple(rate: u32, burst: u32, now: Instant) -> Result<TokenBucket, crate::Error> {
        Self::new(rate, burst, 1, now)
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Credits the bucket for whole replenish periods elapsed since the
    /// last credit, capped at `burst`, and returns the resulting token
    /// count. A `rate == 0` bucket never credits.
    pub fn credit(&mut self, now: Instant) -> u32 {
        if self.replenish_period_us == 0 {
            return self.tokens;
        }
        let elapsed_us = now.saturating_duration_since(self.last_credit).as_micros() as u64;
        let elapsed_periods = elapsed_us / self.replenish_period_us;
        if elapsed_periods == 0 {
            return self.tokens;
        }

        let new_total = (elapsed_periods as u128) * (self.quantum as u128) + self.tokens as u128;
        if new_total > self.burst as u128 {
            self.tokens = self.burst;
            self.last_credit = now;
        } else {
            self.tokens = new_total as u32;
            // Advance only by the whole periods actually consumed, so a
            // fractional remainder isn't discarded on every call.
            self.last_credit +=
                Duration::from_micros(elapsed_periods * self.replenish_period_us);
        }
        self.tokens
    }

    /// Credits using `clock.now()`, for callers that don't already have a
    /// timestamp in hand.
    pub fn credit_now(&mut self, clock: &dyn Clock) -> u32 {
        self.credit(clock.now())
    }

    /// Drains `n` tokens without crediting first. Fails atomically
    /// (leaves the bucket unmodified) if insufficient.
    pub fn drain(&mut self, n: u32) -> Result<(), crate::Error> {
        if n > self.tokens {
            bail!(ErrorInt::InsufficientTokens);
        }
        self.tokens -= n;
        Ok(())
    }

    /// Credits then checks whether `n` tokens are available, without
    /// draining them.
    pub fn conform(&mut self, now: Instant, n: u32) -> Result<(), crate::Error> {
        self.credit(now);
        if n > self.tokens {
            bail!(ErrorInt::InsufficientTokens);
        }
        Ok(())
    }
}
