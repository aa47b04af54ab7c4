// src/services/rate_limit.rs

//! Per-category token buckets with adaptive backoff.
//!
//! When the upstream answers a category with a rate limit, that category's
//! refill rate is scaled down by `backoff_factor` (compounding, floored at
//! `min_rate_factor`), held for `cooldown`, then restored linearly over
//! `recovery`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::RequestError;
use crate::models::{BucketConfig, RateLimitConfig};
use crate::utils::lock;

#[derive(Debug, Clone, Copy)]
struct Penalty {
    factor: f64,
    since: Instant,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    base_rate: f64,
    tokens: f64,
    last_refill: Instant,
    penalty: Option<Penalty>,
}

impl TokenBucket {
    fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            capacity: config.capacity,
            base_rate: config.refill_per_sec,
            tokens: config.capacity,
            last_refill: now,
            penalty: None,
        }
    }

    /// Fraction of the base rate currently in effect.
    fn rate_factor(&self, now: Instant, limits: &RateLimitConfig) -> f64 {
        let Some(penalty) = self.penalty else {
            return 1.0;
        };
        let cooldown = Duration::from_secs(limits.cooldown_secs);
        let recovery = Duration::from_secs(limits.recovery_secs);
        let elapsed = now.saturating_duration_since(penalty.since);
        if elapsed < cooldown {
            return penalty.factor;
        }
        let recovering = elapsed - cooldown;
        if recovering >= recovery {
            return 1.0;
        }
        let progress = recovering.as_secs_f64() / recovery.as_secs_f64();
        penalty.factor + (1.0 - penalty.factor) * progress
    }

    fn rate(&self, now: Instant, limits: &RateLimitConfig) -> f64 {
        self.base_rate * self.rate_factor(now, limits)
    }

    fn refill(&mut self, now: Instant, limits: &RateLimitConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let rate = self.rate(now, limits);
        self.tokens = (self.tokens + elapsed * rate).min(self.capacity);
        self.last_refill = now;
        if self.rate_factor(now, limits) >= 1.0 {
            self.penalty = None;
        }
    }

    fn try_take(&mut self, now: Instant, limits: &RateLimitConfig) -> Result<(), Duration> {
        self.refill(now, limits);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / self.rate(now, limits)))
    }

    fn penalize(&mut self, now: Instant, limits: &RateLimitConfig) {
        self.refill(now, limits);
        let factor = (self.rate_factor(now, limits) * limits.backoff_factor)
            .max(limits.min_rate_factor);
        self.penalty = Some(Penalty { factor, since: now });
        self.tokens = 0.0;
    }
}

/// Current view of one category's bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
}

/// Request budget keyed by endpoint category.
pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.config.max_wait_secs)
    }

    fn bucket(&self, category: &str) -> Arc<Mutex<TokenBucket>> {
        let mut buckets = lock(&self.buckets);
        let bucket = buckets.entry(category.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(TokenBucket::new(
                self.config.bucket_for(category),
                Instant::now(),
            )))
        });
        Arc::clone(bucket)
    }

    /// Take a token if one is available.
    pub fn try_consume(&self, category: &str) -> bool {
        let bucket = self.bucket(category);
        let mut bucket = lock(&bucket);
        bucket.try_take(Instant::now(), &self.config).is_ok()
    }

    /// Wait for a token, giving up with backpressure when the wait would
    /// exceed `max_wait`.
    pub async fn consume_blocking(
        &self,
        category: &str,
        max_wait: Duration,
    ) -> Result<(), RequestError> {
        let bucket = self.bucket(category);
        let deadline = Instant::now() + max_wait;
        loop {
            let now = Instant::now();
            let wait = match lock(&bucket).try_take(now, &self.config) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            if now + wait > deadline {
                return Err(RequestError::Backpressure {
                    category: category.to_string(),
                    retry_after: wait,
                });
            }
            log::debug!("Rate budget '{}' empty, waiting {:?}", category, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Back off after the upstream rate limited this category.
    pub fn on_rate_limit(&self, category: &str) {
        let bucket = self.bucket(category);
        let mut bucket = lock(&bucket);
        let now = Instant::now();
        bucket.penalize(now, &self.config);
        log::warn!(
            "Rate budget '{}' reduced to {:.3} req/s",
            category,
            bucket.rate(now, &self.config)
        );
    }

    /// Clamp local tokens to the server-reported remaining budget.
    pub fn on_rate_limit_headers(&self, category: &str, remaining: u64) {
        let bucket = self.bucket(category);
        let mut bucket = lock(&bucket);
        bucket.refill(Instant::now(), &self.config);
        bucket.tokens = bucket.tokens.min(remaining as f64);
    }

    pub fn snapshot(&self, category: &str) -> BucketSnapshot {
        let bucket = self.bucket(category);
        let mut bucket = lock(&bucket);
        let now = Instant::now();
        bucket.refill(now, &self.config);
        BucketSnapshot {
            tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_per_sec: bucket.rate(now, &self.config),
        }
    }

    /// Drop all adaptive state; buckets start full again.
    pub fn reset(&self) {
        lock(&self.buckets).clear();
    }
}
