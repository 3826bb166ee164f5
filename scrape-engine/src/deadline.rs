//! Session deadline and stop flag.
//!
//! Every blocking operation in a session goes through [`Deadline::bounded`]
//! or [`Deadline::pause`], so a stalled page or a long rate-limit wait can
//! never carry the session past its budget.

use gleaner_core::ScrapeError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Deadline {
    started_at: Instant,
    expires_at: Instant,
    stop: CancellationToken,
}

impl Deadline {
    pub fn starting_now(budget: Duration) -> Self {
        Self::with_token(budget, CancellationToken::new())
    }

    pub fn with_token(budget: Duration, stop: CancellationToken) -> Self {
        let started_at = Instant::now();
        Self {
            started_at,
            expires_at: started_at + budget,
            stop,
        }
    }

    /// A deadline far enough out to never trip; for running components standalone.
    pub fn unbounded() -> Self {
        Self::starting_now(Duration::from_secs(60 * 60 * 24 * 365))
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Boundary check between states and items: the stop flag or the clock.
    pub fn check(&self) -> Result<(), ScrapeError> {
        if self.stop.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        self.ensure_time_left()
    }

    /// Check made right before a network-equivalent operation starts.
    /// Only the clock counts here, so an in-flight item can finish after a
    /// cancellation request.
    pub fn ensure_time_left(&self) -> Result<(), ScrapeError> {
        if self.is_expired() {
            Err(ScrapeError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Runs `fut` but gives up when the deadline passes.
    pub async fn bounded<F>(&self, operation: &str, fut: F) -> Result<F::Output, ScrapeError>
    where
        F: Future,
    {
        self.ensure_time_left()?;
        match timeout_at(self.expires_at, fut).await {
            Ok(output) => Ok(output),
            Err(_) => {
                debug!("Deadline reached while waiting on {}", operation);
                Err(ScrapeError::DeadlineExceeded)
            }
        }
    }

    /// Sleeps for `duration`, or until the deadline if that comes first.
    pub async fn pause(&self, duration: Duration) -> Result<(), ScrapeError> {
        let wake_at = Instant::now() + duration;
        if wake_at >= self.expires_at {
            sleep_until(self.expires_at).await;
            return Err(ScrapeError::DeadlineExceeded);
        }
        sleep_until(wake_at).await;
        Ok(())
    }
}
