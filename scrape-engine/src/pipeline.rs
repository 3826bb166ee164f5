//! Ordered fallback extraction.
//!
//! A pipeline holds several independent strategies for the same logical
//! fetch and runs them in priority order. The first strategy that succeeds
//! with a non-empty (filtered) result wins and nothing after it runs. When
//! every strategy comes back empty or broken the pipeline yields an empty
//! list instead of an error.

use crate::deadline::Deadline;
use crate::filter::CandidateFilter;
use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use gleaner_core::ScrapeError;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// What a single strategy produced. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionStrategyResult<T> {
    pub success: bool,
    pub items: Vec<T>,
    pub strategy: String,
}

impl<T> ExtractionStrategyResult<T> {
    pub fn found(strategy: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            success: true,
            items,
            strategy: strategy.into(),
        }
    }

    pub fn failed(strategy: impl Into<String>) -> Self {
        Self {
            success: false,
            items: Vec::new(),
            strategy: strategy.into(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.success && !self.items.is_empty()
    }
}

/// One way of getting `T`s out of a handle `H` (a page, a DOM snapshot, an API client...).
#[async_trait]
pub trait ExtractionStrategy<H, T>: Send + Sync
where
    H: Send + Sync,
    T: Send,
{
    fn name(&self) -> &str;

    async fn extract(&self, handle: &H) -> Result<Vec<T>, ScrapeError>;
}

/// Adapter turning an async closure over a cloned handle into a strategy.
pub struct FnStrategy<H, T, F> {
    name: String,
    func: F,
    _marker: PhantomData<fn(H) -> T>,
}

pub fn strategy_fn<H, T, F, Fut>(name: impl Into<String>, func: F) -> FnStrategy<H, T, F>
where
    F: Fn(H) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<T>, ScrapeError>> + Send,
{
    FnStrategy {
        name: name.into(),
        func,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<H, T, F, Fut> ExtractionStrategy<H, T> for FnStrategy<H, T, F>
where
    H: Clone + Send + Sync,
    T: Send,
    F: Fn(H) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<T>, ScrapeError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, handle: &H) -> Result<Vec<T>, ScrapeError> {
        (self.func)(handle.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded(usize),
    Empty,
    Failed(String),
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome<T> {
    /// The winning strategy's result, if any strategy won.
    pub result: Option<ExtractionStrategyResult<T>>,
    pub attempts: Vec<StrategyAttempt>,
    /// Set when the deadline cut the pipeline short.
    pub interrupted: bool,
}

impl<T> PipelineOutcome<T> {
    pub fn items(&self) -> &[T] {
        self.result.as_ref().map(|r| r.items.as_slice()).unwrap_or(&[])
    }

    pub fn strategy(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.strategy.as_str())
    }

    pub fn into_items(self) -> Vec<T> {
        self.result.map(|r| r.items).unwrap_or_default()
    }
}

pub struct ExtractionPipeline<H, T> {
    strategies: Vec<Box<dyn ExtractionStrategy<H, T>>>,
    filter: Option<Box<dyn CandidateFilter<T>>>,
}

impl<H, T> ExtractionPipeline<H, T>
where
    H: Send + Sync,
    T: Send,
{
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy<H, T>>>) -> Self {
        Self {
            strategies,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl CandidateFilter<T> + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn push(&mut self, strategy: impl ExtractionStrategy<H, T> + 'static) {
        self.strategies.push(Box::new(strategy));
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Runs without a deadline or rate limit.
    pub async fn run(&self, handle: &H) -> PipelineOutcome<T> {
        self.run_within(handle, &Deadline::unbounded(), None).await
    }

    pub async fn run_within(
        &self,
        handle: &H,
        deadline: &Deadline,
        limiter: Option<&RateLimiter>,
    ) -> PipelineOutcome<T> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let name = strategy.name();

            if let Some(limiter) = limiter {
                if deadline.bounded("rate limiter", limiter.acquire()).await.is_err() {
                    return interrupted(attempts, name);
                }
            }

            let raw = match deadline.bounded(name, strategy.extract(handle)).await {
                Err(_) => return interrupted(attempts, name),
                Ok(raw) => raw,
            };

            let result = match raw {
                Ok(candidates) => {
                    let items = match &self.filter {
                        Some(filter) => filter.apply(candidates),
                        None => candidates,
                    };
                    ExtractionStrategyResult::found(name, items)
                }
                Err(error) => {
                    warn!("Extraction strategy {} failed: {}", name, error);
                    attempts.push(StrategyAttempt {
                        strategy: name.to_string(),
                        outcome: AttemptOutcome::Failed(error.to_string()),
                    });
                    continue;
                }
            };

            if result.is_usable() {
                debug!(
                    "Strategy {} produced {} items",
                    name,
                    result.items.len()
                );
                attempts.push(StrategyAttempt {
                    strategy: name.to_string(),
                    outcome: AttemptOutcome::Succeeded(result.items.len()),
                });
                return PipelineOutcome {
                    result: Some(result),
                    attempts,
                    interrupted: false,
                };
            }

            debug!("Strategy {} came back empty, falling through", name);
            attempts.push(StrategyAttempt {
                strategy: name.to_string(),
                outcome: AttemptOutcome::Empty,
            });
        }

        PipelineOutcome {
            result: None,
            attempts,
            interrupted: false,
        }
    }
}

fn interrupted<T>(mut attempts: Vec<StrategyAttempt>, strategy: &str) -> PipelineOutcome<T> {
    debug!("Deadline reached before strategy {} finished", strategy);
    attempts.push(StrategyAttempt {
        strategy: strategy.to_string(),
        outcome: AttemptOutcome::Interrupted,
    });
    PipelineOutcome {
        result: None,
        attempts,
        interrupted: true,
    }
}
