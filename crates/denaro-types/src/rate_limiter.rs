//! Token-bucket rate limiter.
//!
//! Buckets refill continuously on a monotonic clock. One bucket guards one
//! (endpoint, caller) pair; the keyed registry lives with the peer layer.

use parking_lot::Mutex;
use std::time::Instant;

/// A single token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `capacity` is the burst size; `per_minute` the sustained rate.
    pub fn per_minute(capacity: u32, per_minute: u32) -> TokenBucket {
        TokenBucket {
            capacity: f64::from(capacity),
            refill_per_sec: f64::from(per_minute) / 60.0,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Consume one token. Returns false when the budget is exhausted.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (rounded down).
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        state.tokens as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_allows_within_capacity() {
        let bucket = TokenBucket::per_minute(5, 60);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_refills_over_time() {
        let bucket = TokenBucket::per_minute(2, 6000); // 100 tokens/sec
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        thread::sleep(Duration::from_millis(50));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let bucket = TokenBucket::per_minute(3, 60_000);
        thread::sleep(Duration::from_millis(20));
        assert!(bucket.available() <= 3);
    }
}
