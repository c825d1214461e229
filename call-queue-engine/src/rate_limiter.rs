//! Global token-bucket rate limiter gating calls initiated per second.
//!
//! There is no teacher module for this (the pack's `policy.rs` is SIP/IP
//! admission policy, not a token bucket), so this is a small hand-rolled
//! bucket in the same plain-struct-plus-async-method shape the rest of the
//! engine uses for shared coordination state.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }
}

/// Global rate limiter. One instance shared across all dispatcher workers.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `rate_per_second` is both the refill rate and the bucket capacity, so
    /// a burst can never exceed one second's worth of tokens.
    pub fn new(rate_per_second: u32) -> Self {
        let rate = rate_per_second.max(1) as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: rate,
                capacity: rate,
                refill_per_second: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                bucket.refill();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / bucket.refill_per_second))
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d.max(Duration::from_millis(1))).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn acquires_up_to_capacity_without_waiting() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn blocks_once_capacity_exhausted() {
        let limiter = Arc::new(RateLimiter::new(2));
        for _ in 0..2 {
            limiter.acquire().await;
        }
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
