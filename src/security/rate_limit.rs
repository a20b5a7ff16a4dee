//! Per-key request throttle.
//!
//! Fixed one-minute window: the first request for a key starts its window,
//! the counter resets once the window has elapsed. A caller can therefore
//! burst up to 2x the limit across a window boundary; that is accepted
//! behavior for ingestion throttling. Counters are in-process — in a
//! multi-instance deployment each instance enforces the limit
//! independently, so global enforcement requires a shared counter store
//! (atomic increment-and-expire); that is a deployment concern, not
//! handled here.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Bucket {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    window: Duration,
    buckets: DashMap<String, Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            buckets: DashMap::new(),
        }
    }

    /// Counts one request against `key`. Returns `false` once `limit`
    /// requests have already been admitted in the current window.
    pub fn check(&self, key: &str, limit: u32) -> bool {
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            count: 0,
            window_start: Instant::now(),
        });

        if entry.window_start.elapsed() >= self.window {
            entry.count = 0;
            entry.window_start = Instant::now();
        }

        if entry.count >= limit {
            return false;
        }

        entry.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_plus_one_is_rejected_within_window() {
        let limiter = RateLimiter::with_window(Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.check("key-a", 5));
        }
        assert!(!limiter.check("key-a", 5));
        // Other keys are unaffected.
        assert!(limiter.check("key-b", 5));
    }

    #[test]
    fn next_window_admits_again() {
        let limiter = RateLimiter::with_window(Duration::from_millis(30));
        assert!(limiter.check("key", 1));
        assert!(!limiter.check("key", 1));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("key", 1));
    }
}
