//! Token bucket rate limiter per instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<Uuid, TokenBucket>>>,
    max_tokens: u32,
    refill_rate: f64, // tokens per second
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `requests_per_minute == 0` disables limiting.
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            max_tokens: requests_per_minute,
            refill_rate: requests_per_minute as f64 / 60.0,
        }
    }

    pub fn check(&self, instance_id: &Uuid) -> bool {
        self.check_at(instance_id, Instant::now())
    }

    /// Drop the bucket of an instance that no longer exists.
    pub fn forget(&self, instance_id: &Uuid) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.remove(instance_id);
    }

    /// Number of instances currently holding a bucket.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn check_at(&self, instance_id: &Uuid, now: Instant) -> bool {
        if self.max_tokens == 0 {
            return true;
        }

        // Bucket state stays usable even if a holder panicked.
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let bucket = buckets.entry(*instance_id).or_insert(TokenBucket {
            tokens: self.max_tokens as f64,
            last_refill: now,
        });

        // Refill tokens
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max_tokens as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
