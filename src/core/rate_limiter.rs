//! Token-bucket admission control per server
//!
//! Tokens replenish lazily from elapsed clock time on each check, so there is
//! no background refill task. Over any window of W seconds at most
//! `floor(capacity + refill_rate * W)` calls are admitted.

use crate::utils::clock::SharedClock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity, also the initial token count
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 50.0,
            refill_rate: 50.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens_available: f64,
    last_refill_time: Instant,
}

/// Token bucket for a single server
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: SharedClock,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        let initial_tokens = config.capacity;
        Self {
            config,
            clock,
            state: Mutex::new(BucketState {
                tokens_available: initial_tokens,
                last_refill_time: now,
            }),
        }
    }

    /// Replenish from elapsed time, then take one token if available.
    /// Non-blocking; returns false when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let elapsed = now
            .saturating_duration_since(state.last_refill_time)
            .as_secs_f64();
        state.tokens_available =
            (state.tokens_available + elapsed * self.config.refill_rate).min(self.config.capacity);
        state.last_refill_time = now;

        if state.tokens_available >= 1.0 {
            state.tokens_available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Bounded-wait variant: polls until a token is available or the wait
    /// budget runs out. Used only when blocking admission is configured.
    pub async fn acquire_timeout(&self, max_wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if self.try_acquire() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            // Wait roughly one token's worth of refill, capped to stay
            // responsive to the deadline.
            let step = Duration::from_secs_f64((1.0 / self.config.refill_rate).min(0.05));
            tokio::time::sleep(step).await;
        }
    }

    /// Current token count after lazy refill; diagnostic only.
    pub fn tokens_available(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let elapsed = now
            .saturating_duration_since(state.last_refill_time)
            .as_secs_f64();
        state.tokens_available =
            (state.tokens_available + elapsed * self.config.refill_rate).min(self.config.capacity);
        state.last_refill_time = now;
        state.tokens_available
    }
}

/// One limiter per registered server
pub struct RateLimiterManager {
    limiters: dashmap::DashMap<String, Arc<RateLimiter>>,
    clock: SharedClock,
}

impl RateLimiterManager {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            limiters: dashmap::DashMap::new(),
            clock,
        }
    }

    pub fn get_or_create(&self, server_name: &str, config: RateLimiterConfig) -> Arc<RateLimiter> {
        self.limiters
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(config, Arc::clone(&self.clock))))
            .clone()
    }

    pub fn remove(&self, server_name: &str) {
        self.limiters.remove(server_name);
    }
}
