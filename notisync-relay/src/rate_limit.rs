//! Inbound frame rate limiting, one token bucket per connection key.
//!
//! A connection is keyed by its connection id until it binds to a device,
//! after which its bucket moves under the device id. Buckets are dropped
//! when the connection that owns them closes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    capacity: f64,
    per_second: f64,
}

struct TokenBucket {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    fn take(&mut self, now: Instant, capacity: f64, per_second: f64) -> bool {
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(capacity);
        self.refilled_at = now;

        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

impl RateLimiter {
    pub fn new(frames_per_minute: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            capacity: f64::from(frames_per_minute),
            per_second: f64::from(frames_per_minute) / 60.0,
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spend one token from `key`'s bucket. False when it is empty.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let capacity = self.capacity;
        self.buckets()
            .entry(key.to_string())
            .or_insert(TokenBucket {
                tokens: capacity,
                refilled_at: now,
            })
            .take(now, capacity, self.per_second)
    }

    /// Move the bucket under `from` to `to`. A bucket already held under
    /// `to` wins, so reconnecting never refills a device's allowance.
    pub fn rekey(&self, from: &str, to: &str) {
        let mut buckets = self.buckets();
        if let Some(bucket) = buckets.remove(from) {
            buckets.entry(to.to_string()).or_insert(bucket);
        }
    }

    pub fn forget(&self, key: &str) {
        self.buckets().remove(key);
    }

    /// Number of buckets currently tracked.
    pub fn tracked(&self) -> usize {
        self.buckets().len()
    }
}
