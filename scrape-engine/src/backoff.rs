use crate::deadline::Deadline;
use crate::rate_limiter::RateLimiter;
use gleaner_core::config::RetrySection;
use gleaner_core::ScrapeError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000, // 1 second
            max_delay_ms: 30000, // 30 seconds
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

impl From<&RetrySection> for BackoffConfig {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            base_delay_ms: section.base_delay_ms,
            max_delay_ms: section.max_delay_ms,
            backoff_multiplier: section.backoff_multiplier,
            jitter_factor: section.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after the delay the platform asked for
    RetryWithDelay(Duration),
    /// Don't retry (for permanent failures)
    NoRetry,
}

/// Determine retry strategy based on error type
pub fn get_retry_strategy(error: &ScrapeError) -> RetryStrategy {
    match error {
        ScrapeError::RateLimited { retry_after_ms } => {
            RetryStrategy::RetryWithDelay(Duration::from_millis(*retry_after_ms))
        }
        // Network hiccups and pages that did not settle are usually transient
        ScrapeError::TransientNetwork { .. } | ScrapeError::PageTimeout { .. } => {
            RetryStrategy::Retry
        }
        // Credentials, bad targets and missing items will not get better
        ScrapeError::Authentication { .. }
        | ScrapeError::VerificationChallenge { .. }
        | ScrapeError::MalformedTarget { .. }
        | ScrapeError::ItemUnavailable { .. } => RetryStrategy::NoRetry,
        // Planned stops are never retried
        ScrapeError::DeadlineExceeded | ScrapeError::Cancelled => RetryStrategy::NoRetry,
        ScrapeError::Navigation { .. }
        | ScrapeError::ItemDiscovery { .. }
        | ScrapeError::ExtractionStrategy { .. } => RetryStrategy::NoRetry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    let base_delay = Duration::from_millis(config.base_delay_ms);
    let max_delay = Duration::from_millis(config.max_delay_ms);

    // Calculate exponential backoff
    let exponential_delay = if attempt == 0 {
        base_delay
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    // Add jitter to prevent synchronized retries
    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    let final_delay = exponential_delay + Duration::from_millis(jitter);

    // Ensure we don't exceed max delay
    final_delay.min(max_delay)
}

/// Bookkeeping for one operation; dropped once it resolves.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub operation: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryContext {
    fn new(operation: &str, config: &BackoffConfig) -> Self {
        Self {
            operation: operation.to_string(),
            attempt: 0,
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

/// Retry metrics for the session summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub recovered_operations: u64,
    pub exhausted_operations: u64,
    pub total_delay_ms: u64,
}

/// Session-scoped retry policy.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    metrics: Mutex<RetryMetrics>,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            metrics: Mutex::new(RetryMetrics::default()),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (0 = first retry).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        calculate_delay(attempt, &self.config)
    }

    /// `attempts_made` counts the attempts already spent on the operation.
    pub fn should_retry(&self, attempts_made: u32, error: &ScrapeError) -> bool {
        attempts_made < self.config.max_attempts
            && get_retry_strategy(error) != RetryStrategy::NoRetry
    }

    fn delay_for(&self, attempts_made: u32, error: &ScrapeError) -> Duration {
        match get_retry_strategy(error) {
            RetryStrategy::RetryWithDelay(delay) => {
                delay.min(Duration::from_millis(self.config.max_delay_ms))
            }
            _ => self.next_delay(attempts_made.saturating_sub(1)),
        }
    }

    fn metrics_guard(&self) -> MutexGuard<'_, RetryMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of
    /// attempts. Each attempt takes a rate-limit token when a limiter is
    /// given, and every wait is bounded by `deadline`.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        deadline: &Deadline,
        limiter: Option<&RateLimiter>,
        mut operation: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let mut context = RetryContext::new(operation_name, &self.config);
        let mut total_delay = Duration::ZERO;

        loop {
            if let Some(limiter) = limiter {
                deadline.bounded("rate limiter", limiter.acquire()).await?;
            }
            deadline.ensure_time_left()?;
            context.attempt += 1;

            match deadline.bounded(operation_name, operation()).await? {
                Ok(result) => {
                    if context.attempt > 1 {
                        let mut metrics = self.metrics_guard();
                        metrics.recovered_operations += 1;
                        info!(
                            "Operation {} succeeded after {} retries (total delay: {:?})",
                            context.operation,
                            context.attempt - 1,
                            total_delay
                        );
                    }
                    return Ok(result);
                }
                Err(error) => {
                    debug!(
                        "Attempt {}/{} failed for {}: {}",
                        context.attempt, context.max_attempts, context.operation, error
                    );

                    if !self.should_retry(context.attempt, &error) {
                        if get_retry_strategy(&error) != RetryStrategy::NoRetry {
                            self.metrics_guard().exhausted_operations += 1;
                            warn!(
                                "Operation {} gave up after {} attempts (base delay {:?}): {}",
                                context.operation, context.attempt, context.base_delay, error
                            );
                        } else {
                            debug!(
                                "Not retrying {} due to error type: {}",
                                context.operation, error
                            );
                        }
                        return Err(error);
                    }

                    let delay = self.delay_for(context.attempt, &error);
                    total_delay += delay;
                    {
                        let mut metrics = self.metrics_guard();
                        metrics.total_retries += 1;
                        metrics.total_delay_ms += delay.as_millis() as u64;
                    }

                    info!(
                        "Retrying {} in {:?} due to: {}",
                        context.operation, delay, error
                    );
                    deadline.pause(delay).await?;
                }
            }
        }
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        self.metrics_guard().clone()
    }
}
