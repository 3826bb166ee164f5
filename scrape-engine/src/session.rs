//! One scraping run, driven as a state machine.
//!
//! `Idle -> Authenticating -> Navigating -> Collecting -> Extracting -> Completed`,
//! with `Failed`, `DeadlineExceeded` and `Cancelled` reachable from every
//! non-terminal state. Whatever was extracted before the run stopped is
//! flushed to the configured sinks and returned in the [`SessionReport`].

use crate::backoff::{BackoffConfig, BackoffPolicy};
use crate::deadline::Deadline;
use crate::driver::{CommentTarget, PlatformDriver};
use crate::fingerprint::AntiDetectionProfile;
use crate::filter::CommentFilter;
use crate::pipeline::ExtractionPipeline;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::store::{AppendOutcome, FlushReport, PartialResultStore};
use crate::summary::{ExecutionSummary, SummaryRecorder};
use gleaner_core::{
    Comment, ConfigError, CoreError, Credentials, EngineConfig, ErrorExt, ExtractedItem, ItemRef,
    ResultSink, ScrapeError, ScrapeTarget, SessionState,
};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Global wall-clock budget for the whole run.
    pub timeout: Duration,
    pub auth_timeout: Duration,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    /// Consecutive paging rounds without a new item before collection stops.
    pub max_idle_pages: u32,
    pub rate_limit: RateLimitConfig,
    pub backoff: BackoffConfig,
    pub min_action_delay: Duration,
    pub max_action_delay: Duration,
    pub comment_filter: CommentFilter,
    /// Fixes the fingerprint and action pacing; random when unset.
    pub profile_seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_sections(&EngineConfig::default(), CommentFilter::new())
    }
}

impl SessionOptions {
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let filter = CommentFilter::from_section(&config.comments)?;
        Ok(Self::from_sections(config, filter))
    }

    fn from_sections(config: &EngineConfig, comment_filter: CommentFilter) -> Self {
        let session = &config.session;
        Self {
            timeout: Duration::from_secs(session.timeout_secs),
            auth_timeout: Duration::from_secs(session.auth_timeout_secs),
            ready_timeout: Duration::from_secs(session.ready_timeout_secs),
            poll_interval: Duration::from_millis(session.poll_interval_ms),
            max_idle_pages: session.max_idle_pages.max(1),
            rate_limit: RateLimitConfig::from(&config.rate_limit),
            backoff: BackoffConfig::from(&config.retry),
            min_action_delay: Duration::from_millis(config.anti_detection.min_action_delay_ms),
            max_action_delay: Duration::from_millis(config.anti_detection.max_action_delay_ms),
            comment_filter,
            profile_seed: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_action_delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_action_delay = min;
        self.max_action_delay = max;
        self
    }

    pub fn with_profile_seed(mut self, seed: u64) -> Self {
        self.profile_seed = Some(seed);
        self
    }
}

/// Everything the caller learns about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub target: ScrapeTarget,
    pub terminal_state: SessionState,
    /// `AuthenticationError`, `NavigationError`, `DeadlineExceeded`... when not completed.
    pub error_kind: Option<String>,
    pub reason: Option<String>,
    pub items: Vec<ExtractedItem>,
    pub summary: ExecutionSummary,
    pub flush: FlushReport,
}

impl SessionReport {
    pub fn is_completed(&self) -> bool {
        self.terminal_state == SessionState::Completed
    }

    pub fn flush_errors(&self) -> Vec<String> {
        self.flush.errors()
    }
}

pub struct ScrapeSession<D: PlatformDriver> {
    id: Uuid,
    target: ScrapeTarget,
    options: SessionOptions,
    credentials: Credentials,
    driver: D,
    state: SessionState,
    stop: CancellationToken,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
    profile: AntiDetectionProfile,
    comments: ExtractionPipeline<CommentTarget, Comment>,
    store: PartialResultStore,
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl<D: PlatformDriver> ScrapeSession<D> {
    pub fn new(
        target: ScrapeTarget,
        options: SessionOptions,
        credentials: Credentials,
        driver: D,
    ) -> Result<Self, CoreError> {
        target.validate()?;

        let profile = match options.profile_seed {
            Some(seed) => AntiDetectionProfile::from_seed(seed),
            None => AntiDetectionProfile::randomized(),
        }
        .with_delay_range(options.min_action_delay, options.max_action_delay);

        let comments = ExtractionPipeline::new(driver.comment_strategies())
            .with_filter(options.comment_filter.clone());

        Ok(Self {
            id: Uuid::new_v4(),
            target,
            limiter: RateLimiter::new(options.rate_limit.clone()),
            backoff: BackoffPolicy::new(options.backoff.clone()),
            options,
            credentials,
            driver,
            state: SessionState::Idle,
            stop: CancellationToken::new(),
            profile,
            comments,
            store: PartialResultStore::new(),
            sinks: Vec::new(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn ResultSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    /// Shares an externally owned stop flag (Ctrl-C handler, supervisor...).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> &AntiDetectionProfile {
        &self.profile
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Another handle to the result buffer, usable after the session is gone.
    pub fn store_handle(&self) -> PartialResultStore {
        self.store.clone()
    }

    pub async fn run(mut self) -> SessionReport {
        let deadline = Deadline::with_token(self.options.timeout, self.stop.clone());
        let mut recorder = SummaryRecorder::new();

        info!(
            "Session {} starting: {} on {} (limit {}, timeout {:?})",
            self.id,
            self.target.url,
            self.target.platform,
            self.target.item_limit,
            self.options.timeout
        );

        let outcome = self.drive(&deadline, &mut recorder).await;

        let (terminal_state, error_kind, reason) = match outcome {
            Ok(()) => (SessionState::Completed, None, None),
            Err(ScrapeError::DeadlineExceeded) => (
                SessionState::DeadlineExceeded,
                Some(ScrapeError::DeadlineExceeded.kind().to_string()),
                Some(format!(
                    "deadline of {:?} exceeded during {}",
                    self.options.timeout, self.state
                )),
            ),
            Err(ScrapeError::Cancelled) => (
                SessionState::Cancelled,
                Some(ScrapeError::Cancelled.kind().to_string()),
                Some(format!("cancelled during {}", self.state)),
            ),
            Err(e) => {
                error!("Session {} failed: {}", self.id, e.user_friendly_message());
                (
                    SessionState::Failed,
                    Some(e.kind().to_string()),
                    Some(format!("{}: {}", e.kind(), e)),
                )
            }
        };
        self.transition(terminal_state);

        let flush = self.store.flush(&self.sinks).await;
        let items = self.store.snapshot().await;
        let limiter_status = self.limiter.get_rate_limit_status().await;
        let summary = recorder.finish(
            &items,
            &self.backoff.get_metrics(),
            limiter_status.total_acquired,
            limiter_status.total_wait,
            deadline.elapsed(),
            terminal_state,
        );

        info!(
            "Session {} finished as {} with {} items in {:?}",
            self.id,
            terminal_state,
            items.len(),
            summary.elapsed
        );

        SessionReport {
            session_id: self.id,
            target: self.target,
            terminal_state,
            error_kind,
            reason,
            items,
            summary,
            flush,
        }
    }

    async fn drive(
        &mut self,
        deadline: &Deadline,
        recorder: &mut SummaryRecorder,
    ) -> Result<(), ScrapeError> {
        self.authenticate(deadline, recorder).await?;
        self.navigate(deadline, recorder).await?;
        let queue = self.collect(deadline, recorder).await?;
        self.extract_all(queue, deadline, recorder).await
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    async fn authenticate(
        &mut self,
        deadline: &Deadline,
        recorder: &mut SummaryRecorder,
    ) -> Result<(), ScrapeError> {
        self.transition(SessionState::Authenticating);
        deadline.check()?;

        let into_auth = |e: ScrapeError| escalate_fatal(e, |reason| ScrapeError::Authentication { reason });

        let driver = &self.driver;
        let profile = &self.profile;
        self.backoff
            .execute("prepare", deadline, None, move || driver.prepare(profile))
            .await
            .map_err(into_auth)?;

        // Rejections are not retryable, so credentials go out once unless the
        // submit itself hit a transient failure.
        let credentials = &self.credentials;
        self.call("authenticate", deadline, recorder, move || {
            driver.authenticate(credentials)
        })
        .await
        .map_err(into_auth)?;

        let landed = self
            .wait_until(
                "authenticated landing",
                deadline,
                self.options.auth_timeout,
                move || driver.is_authenticated(),
            )
            .await
            .map_err(into_auth)?;

        if !landed {
            return Err(ScrapeError::Authentication {
                reason: format!(
                    "no authenticated landing state within {:?}",
                    self.options.auth_timeout
                ),
            });
        }

        info!("Session {} authenticated", self.id);
        Ok(())
    }

    async fn navigate(
        &mut self,
        deadline: &Deadline,
        recorder: &mut SummaryRecorder,
    ) -> Result<(), ScrapeError> {
        self.transition(SessionState::Navigating);
        deadline.check()?;

        let url = self.target.url.as_str();
        let into_navigation = |e: ScrapeError| {
            escalate_fatal(e, |reason| ScrapeError::Navigation {
                url: url.to_string(),
                reason,
            })
        };

        let driver = &self.driver;
        self.call("open_target", deadline, recorder, move || driver.open_target(url))
            .await
            .map_err(into_navigation)?;

        let ready = self
            .wait_until(
                "content container",
                deadline,
                self.options.ready_timeout,
                move || driver.content_ready(),
            )
            .await
            .map_err(into_navigation)?;

        if !ready {
            return Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason: format!(
                    "content container not reachable within {:?}",
                    self.options.ready_timeout
                ),
            });
        }

        Ok(())
    }

    async fn collect(
        &mut self,
        deadline: &Deadline,
        recorder: &mut SummaryRecorder,
    ) -> Result<VecDeque<ItemRef>, ScrapeError> {
        self.transition(SessionState::Collecting);

        let limit = self.target.item_limit;
        let mut queue = VecDeque::with_capacity(limit);
        let mut seen = HashSet::new();
        let mut idle_rounds = 0u32;

        loop {
            deadline.check()?;

            let driver = &self.driver;
            let discovered = self
                .call("discover_items", deadline, recorder, move || {
                    driver.discover_items()
                })
                .await;

            let mut fresh = 0usize;
            match discovered {
                Ok(refs) => {
                    for item_ref in refs {
                        if queue.len() >= limit {
                            break;
                        }
                        if seen.insert(item_ref.item_id.clone()) {
                            queue.push_back(item_ref);
                            fresh += 1;
                        } else {
                            recorder.record_duplicate();
                        }
                    }
                }
                Err(e) if e.is_stop_signal() => return Err(e),
                Err(e) => {
                    let e = e.escalate(|reason| ScrapeError::ItemDiscovery { reason });
                    warn!("{} ({}), counting as an idle round", e, e.kind());
                }
            }

            debug!(
                "Discovered {} new items ({} queued of {})",
                fresh,
                queue.len(),
                limit
            );

            if queue.len() >= limit {
                break;
            }

            if fresh == 0 {
                idle_rounds += 1;
                if idle_rounds >= self.options.max_idle_pages {
                    info!(
                        "No new items after {} paging rounds, stopping collection",
                        idle_rounds
                    );
                    break;
                }
            } else {
                idle_rounds = 0;
            }

            deadline.pause(self.profile.next_action_delay()).await?;

            let driver = &self.driver;
            match self
                .call("load_more", deadline, recorder, move || driver.load_more())
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    info!("Feed exhausted with {} items queued", queue.len());
                    break;
                }
                Err(e) if e.is_stop_signal() => return Err(e),
                Err(e) => warn!("Paging failed: {}", e),
            }
        }

        info!("Collected {} item refs", queue.len());
        Ok(queue)
    }

    async fn extract_all(
        &mut self,
        mut queue: VecDeque<ItemRef>,
        deadline: &Deadline,
        recorder: &mut SummaryRecorder,
    ) -> Result<(), ScrapeError> {
        self.transition(SessionState::Extracting);

        while let Some(item_ref) = queue.pop_front() {
            deadline.check()?;

            match self.extract_item(&item_ref, deadline, recorder).await {
                Ok(item) => match self.store.append(item).await {
                    AppendOutcome::Appended => {
                        debug!("Extracted item {}", item_ref.item_id);
                    }
                    AppendOutcome::Duplicate => recorder.record_duplicate(),
                },
                Err(e) if e.is_stop_signal() => {
                    warn!("Discarding unfinished item {}", item_ref.item_id);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Skipping item {} after {}: {}",
                        item_ref.item_id,
                        e.kind(),
                        e
                    );
                    recorder.record_failed_item();
                }
            }

            if !queue.is_empty() {
                deadline.pause(self.profile.next_action_delay()).await?;
            }
        }

        Ok(())
    }

    async fn extract_item(
        &self,
        item_ref: &ItemRef,
        deadline: &Deadline,
        recorder: &mut SummaryRecorder,
    ) -> Result<ExtractedItem, ScrapeError> {
        let driver = &self.driver;
        let metadata = self
            .call("fetch_metadata", deadline, recorder, move || {
                driver.fetch_metadata(item_ref)
            })
            .await
            .map_err(|e| {
                e.escalate(|reason| ScrapeError::ItemUnavailable {
                    item_id: item_ref.item_id.clone(),
                    reason,
                })
            })?;

        let comments = if self.target.extract_comments && !self.comments.is_empty() {
            let handle = CommentTarget {
                item: item_ref.clone(),
                max_comments: self.target.max_comments_per_item,
            };
            let outcome = self
                .comments
                .run_within(&handle, deadline, Some(&self.limiter))
                .await;

            if outcome.interrupted {
                return Err(ScrapeError::DeadlineExceeded);
            }
            match outcome.strategy() {
                Some(strategy) => recorder.record_strategy_success(strategy),
                None => debug!("No comment strategy produced results for {}", item_ref.item_id),
            }

            let mut comments = outcome.into_items();
            comments.truncate(self.target.max_comments_per_item);
            comments
        } else {
            Vec::new()
        };

        Ok(ExtractedItem::from_parts(item_ref, metadata, comments))
    }

    /// A rate-limited, retried, deadline-bounded driver call.
    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        deadline: &Deadline,
        recorder: &mut SummaryRecorder,
        op: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let started = Instant::now();
        let result = self
            .backoff
            .execute(operation, deadline, Some(&self.limiter), op)
            .await;
        recorder.record_operation(operation, started.elapsed(), result.is_ok());
        result
    }

    /// Polls `probe` until it reports true, `limit` passes, or the deadline trips.
    async fn wait_until<F, Fut>(
        &self,
        what: &str,
        deadline: &Deadline,
        limit: Duration,
        mut probe: F,
    ) -> Result<bool, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, ScrapeError>>,
    {
        let give_up_at = Instant::now() + limit;

        loop {
            deadline.check()?;
            match deadline.bounded(what, probe()).await? {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_retryable() => debug!("Probe for {} failed: {}", what, e),
                Err(e) => return Err(e),
            }

            if Instant::now() + self.options.poll_interval > give_up_at {
                debug!("Gave up waiting for {} after {:?}", what, limit);
                return Ok(false);
            }
            deadline.pause(self.options.poll_interval).await?;
        }
    }
}

/// Folds a stage's non-fatal errors into that stage's fatal kind. Stop
/// signals and errors that are already fatal pass through.
fn escalate_fatal<F>(error: ScrapeError, into: F) -> ScrapeError
where
    F: FnOnce(String) -> ScrapeError,
{
    if error.is_stop_signal() || error.is_fatal() {
        error
    } else {
        into(error.to_string())
    }
}
