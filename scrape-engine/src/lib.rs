pub mod backoff;
pub mod deadline;
pub mod driver;
pub mod filter;
pub mod fingerprint;
pub mod pipeline;
pub mod rate_limiter;
pub mod replay;
pub mod session;
pub mod sinks;
pub mod store;
pub mod summary;

#[cfg(test)]
mod tests;

pub use backoff::{BackoffConfig, BackoffPolicy, RetryContext, RetryMetrics, RetryStrategy};
pub use deadline::Deadline;
pub use driver::{CommentStrategy, CommentTarget, PlatformDriver};
pub use filter::{CandidateFilter, CommentFilter};
pub use fingerprint::AntiDetectionProfile;
pub use pipeline::{
    strategy_fn, AttemptOutcome, ExtractionPipeline, ExtractionStrategy,
    ExtractionStrategyResult, PipelineOutcome, StrategyAttempt,
};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use replay::{FeedCapture, ReplayDriver};
pub use session::{ScrapeSession, SessionOptions, SessionReport};
pub use sinks::{HttpSink, JsonFileSink};
pub use store::{AppendOutcome, FlushReport, PartialResultStore};
pub use summary::ExecutionSummary;
