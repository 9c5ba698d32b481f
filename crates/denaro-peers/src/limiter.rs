//! Keyed rate limiting.
//!
//! One token bucket per caller (node id or client IP); buckets are
//! in-memory only and shed after an idle period.

use denaro_types::rate_limiter::TokenBucket;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const IDLE_SHED_AFTER: Duration = Duration::from_secs(600);
const SHED_CHECK_THRESHOLD: usize = 4_096;

struct KeyedBucket {
    bucket: TokenBucket,
    last_access: Instant,
}

/// A bucket registry for one endpoint class.
pub struct KeyedLimiter {
    capacity: u32,
    per_minute: u32,
    buckets: Mutex<HashMap<String, KeyedBucket>>,
}

impl KeyedLimiter {
    pub fn per_minute(capacity: u32, per_minute: u32) -> KeyedLimiter {
        KeyedLimiter {
            capacity,
            per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for `key`. False means rate-limited.
    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        if buckets.len() > SHED_CHECK_THRESHOLD {
            let now = Instant::now();
            buckets.retain(|_, b| now.duration_since(b.last_access) < IDLE_SHED_AFTER);
        }
        let entry = buckets
            .entry(key.to_string())
            .or_insert_with(|| KeyedBucket {
                bucket: TokenBucket::per_minute(self.capacity, self.per_minute),
                last_access: Instant::now(),
            });
        entry.last_access = Instant::now();
        entry.bucket.try_acquire()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_isolated() {
        let limiter = KeyedLimiter::per_minute(2, 60);
        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));
        // A different caller has a full bucket.
        assert!(limiter.check("bob"));
        assert_eq!(limiter.tracked_keys(), 2);
    }
}
