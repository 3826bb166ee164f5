use gleaner_core::config::RateLimitSection;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    /// Roughly the cadence of a person browsing a feed.
    pub fn human_browsing() -> Self {
        Self {
            max_requests: 30,                     // 30 actions per minute
            time_window: Duration::from_secs(60), // 1 minute window
            burst_allowance: 5,
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            ..Self::human_browsing()
        }
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.max_requests as f64 / self.time_window.as_secs_f64()
    }

    /// Smallest gap allowed between two acquisitions (`1/R`).
    pub fn min_interval(&self) -> Duration {
        self.time_window / self.max_requests.max(1)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::human_browsing()
    }
}

impl From<&RateLimitSection> for RateLimitConfig {
    fn from(section: &RateLimitSection) -> Self {
        Self {
            max_requests: section.requests_per_minute.max(1),
            time_window: Duration::from_secs(60),
            burst_allowance: section.burst_capacity.max(1),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_acquired: Option<Instant>,
}

/// Token bucket that also enforces a minimum spacing between consumptions,
/// so a full bucket never turns into a burst.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64, // tokens per second
    min_interval: Duration,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance.max(1) as f64;

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                last_acquired: None,
            }),
            capacity,
            refill_rate: config.refill_rate(),
            min_interval: config.min_interval(),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let tokens_to_add = elapsed.as_secs_f64() * self.refill_rate;

        state.tokens = (state.tokens + tokens_to_add).min(self.capacity);
        state.last_refill = now;
    }

    /// Consumes one token, or returns how long to wait before trying again.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        // Read after the lock so a queued caller never rewinds `last_refill`.
        let now = Instant::now();
        self.refill(&mut state, now);

        if let Some(last) = state.last_acquired {
            let since_last = now.saturating_duration_since(last);
            if since_last < self.min_interval {
                return Err(self.min_interval - since_last);
            }
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.last_acquired = Some(now);
            Ok(())
        } else {
            // Calculate wait time for next token
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }
}

/// Session-scoped request limiter. `acquire` always succeeds eventually.
#[derive(Debug)]
pub struct RateLimiter {
    token_bucket: TokenBucket,
    config: RateLimitConfig,
    stats: Mutex<RateLimitStatus>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let token_bucket = TokenBucket::new(&config);

        Self {
            token_bucket,
            config,
            stats: Mutex::new(RateLimitStatus::default()),
        }
    }

    pub async fn acquire(&self) {
        let start_time = Instant::now();

        loop {
            match self.token_bucket.try_acquire().await {
                Ok(()) => break,
                Err(wait_time) => {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    sleep(wait_time).await;
                }
            }
        }

        let mut stats = self.stats.lock().await;
        stats.total_acquired += 1;
        stats.total_wait += start_time.elapsed();
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.stats.lock().await.clone()
    }
}

/// What the limiter cost a session, reported in its summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub total_acquired: u64,
    pub total_wait: Duration,
}
