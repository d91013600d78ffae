use crate::clock::{Clock, SystemClock};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolgate_core::{CallerKey, ToolgateError, ToolgateResult};
use tracing::debug;

/// Rate limit configuration shared by every bucket of a limiter.
///
/// Invariants: `requests_per_minute` is finite and positive, `burst_size >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRateLimitConfig")]
pub struct RateLimitConfig {
    requests_per_minute: f64,
    burst_size: u32,
}

#[derive(Deserialize)]
struct RawRateLimitConfig {
    requests_per_minute: f64,
    #[serde(default)]
    burst_size: Option<u32>,
}

impl TryFrom<RawRateLimitConfig> for RateLimitConfig {
    type Error = ToolgateError;

    fn try_from(raw: RawRateLimitConfig) -> Result<Self, Self::Error> {
        match raw.burst_size {
            Some(burst) => Self::new(raw.requests_per_minute, burst),
            None => Self::per_minute(raw.requests_per_minute),
        }
    }
}

impl RateLimitConfig {
    /// Create a validated configuration.
    pub fn new(requests_per_minute: f64, burst_size: u32) -> ToolgateResult<Self> {
        if !requests_per_minute.is_finite() || requests_per_minute <= 0.0 {
            return Err(ToolgateError::Config(format!(
                "requests_per_minute must be positive, got {requests_per_minute}"
            )));
        }
        if !(requests_per_minute / 60.0).is_normal() {
            return Err(ToolgateError::Config(format!(
                "requests_per_minute {requests_per_minute} is too small to refill"
            )));
        }
        if burst_size == 0 {
            return Err(ToolgateError::Config(
                "burst_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            requests_per_minute,
            burst_size,
        })
    }

    /// Configuration whose burst equals the per-minute rate (at least 1).
    pub fn per_minute(requests_per_minute: f64) -> ToolgateResult<Self> {
        let burst = if requests_per_minute.is_finite() && requests_per_minute > 0.0 {
            requests_per_minute.ceil().min(f64::from(u32::MAX)) as u32
        } else {
            0
        };
        Self::new(requests_per_minute, burst.max(1))
    }

    /// Sustained rate.
    pub fn requests_per_minute(&self) -> f64 {
        self.requests_per_minute
    }

    /// Bucket capacity.
    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    /// Tokens added per second.
    pub fn refill_rate_per_sec(&self) -> f64 {
        self.requests_per_minute / 60.0
    }
}

/// Per-key token state.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        let capacity = f64::from(config.burst_size);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: config.refill_rate_per_sec(),
            last_refill: now,
        }
    }

    /// Credit the tokens earned since the last refill.
    ///
    /// A clock reading earlier than `last_refill` counts as zero elapsed time
    /// and does not move `last_refill` back.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Tokens the bucket would hold after `idle` more time, uncapped.
    fn projected_tokens(&self, idle: Duration) -> f64 {
        self.tokens + idle.as_secs_f64() * self.refill_rate
    }

    /// Take one token, or report how long until one is available.
    fn try_consume(&mut self, now: Instant) -> Result<f64, Duration> {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(self.tokens)
        } else {
            let secs_to_wait = (1.0 - self.tokens) / self.refill_rate;
            Err(Duration::try_from_secs_f64(secs_to_wait).unwrap_or(Duration::MAX))
        }
    }
}

/// Token-bucket rate limiter keyed by [`CallerKey`].
///
/// Each key gets its own bucket behind its own mutex. The key map is only
/// write-locked to insert or remove buckets, so callers on different keys
/// never serialize on each other.
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    buckets: RwLock<HashMap<CallerKey, Arc<Mutex<TokenBucket>>>>,
}

impl TokenBucketLimiter {
    /// Create a limiter driven by the system clock.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter driven by the given clock.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration every bucket uses.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn bucket(&self, key: &CallerKey) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            debug!(caller_key = %key, "Creating token bucket");
            Arc::new(Mutex::new(TokenBucket::new(&self.config, self.clock.now())))
        });
        Arc::clone(bucket)
    }

    /// Try to consume one token for `key`.
    ///
    /// Fails with [`ToolgateError::RateLimited`] carrying the advisory
    /// `retry_after` when the bucket is empty.
    pub fn try_acquire(&self, key: &CallerKey) -> ToolgateResult<()> {
        let bucket = self.bucket(key);
        let outcome = {
            let mut bucket = bucket.lock();
            bucket.try_consume(self.clock.now())
        };

        match outcome {
            Ok(remaining) => {
                debug!(caller_key = %key, tokens_remaining = remaining, "Rate limit check passed");
                Ok(())
            }
            Err(retry_after) => {
                debug!(
                    caller_key = %key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                Err(ToolgateError::RateLimited {
                    caller_key: key.clone(),
                    retry_after,
                })
            }
        }
    }

    /// Tokens currently available to `key`, after refill.
    ///
    /// An unseen key reports full capacity without allocating a bucket.
    pub fn available_tokens(&self, key: &CallerKey) -> f64 {
        let Some(bucket) = self.buckets.read().get(key).map(Arc::clone) else {
            return f64::from(self.config.burst_size);
        };
        let mut bucket = bucket.lock();
        bucket.refill(self.clock.now());
        bucket.tokens
    }

    /// Forget the bucket for `key`; its next call starts at full capacity.
    pub fn reset(&self, key: &CallerKey) {
        self.buckets.write().remove(key);
    }

    /// Forget every bucket.
    pub fn reset_all(&self) {
        self.buckets.write().clear();
    }

    /// Drop buckets that have been idle for at least `max_idle` and would be
    /// full by now.
    ///
    /// A bucket still refilling is kept, since recreating it would hand the
    /// caller a full burst early. Buckets currently held by an in-flight
    /// `try_acquire` are kept too. Returns the number of buckets removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let bucket = bucket.lock();
            let idle = now.saturating_duration_since(bucket.last_refill);
            idle < max_idle || bucket.projected_tokens(idle) < bucket.capacity
        });
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle token buckets");
        }
        evicted
    }

    /// Number of keys with a live bucket.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Whether no key has a live bucket.
    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("keys", &self.len())
            .finish()
    }
}
