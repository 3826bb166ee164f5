use crate::driver::{CommentStrategy, PlatformDriver};
use crate::rate_limiter::RateLimitConfig;
use crate::replay::{AuthOutcome, CommentSource, FeedCapture, ItemCapture, ReplayDriver};
use crate::session::{ScrapeSession, SessionOptions, SessionReport};
use async_trait::async_trait;
use gleaner_core::{
    Comment, Credentials, ExtractedItem, ItemKind, ItemMetadata, ItemRef, PersistenceError,
    ResultSink, ScrapeError, ScrapeTarget, SessionState,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PROFILE_URL: &str = "https://www.instagram.com/someone/";

fn target(limit: usize) -> ScrapeTarget {
    ScrapeTarget::new("instagram", PROFILE_URL, limit).unwrap()
}

fn credentials() -> Credentials {
    Credentials::new("collector", "hunter2")
}

fn options() -> SessionOptions {
    let mut options = SessionOptions::default()
        .with_action_delay(Duration::from_millis(100), Duration::from_millis(300))
        .with_profile_seed(11);
    options.rate_limit = RateLimitConfig::per_minute(600);
    options
}

fn post(id: &str) -> ItemRef {
    ItemRef::new(id, ItemKind::Post, format!("https://www.instagram.com/p/{}/", id))
}

fn metadata(id: &str) -> ItemMetadata {
    ItemMetadata {
        author: "someone".to_string(),
        content: format!("caption for {}", id),
        likes: 10,
        comment_count: 0,
    }
}

fn capture(pages: &[&[&str]]) -> FeedCapture {
    let mut capture = FeedCapture::default();
    for page in pages {
        capture
            .pages
            .push(page.iter().map(|id| post(id)).collect());
        for id in page.iter() {
            capture.items.insert(
                id.to_string(),
                ItemCapture {
                    metadata: Some(metadata(id)),
                    ..Default::default()
                },
            );
        }
    }
    capture
}

fn ids(report: &SessionReport) -> Vec<String> {
    report.items.iter().map(|i| i.item_id.clone()).collect()
}

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingSink {
    fn last_batch(&self) -> Vec<String> {
        self.batches.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn persist(&self, items: &[ExtractedItem]) -> Result<usize, PersistenceError> {
        let batch = items.iter().map(|i| i.item_id.clone()).collect();
        self.batches.lock().unwrap().push(batch);
        Ok(items.len())
    }
}

/// Driver with hand-tuned timing and failure knobs, recording when every
/// network-equivalent call starts.
struct ScriptedDriver {
    pages: Vec<Vec<ItemRef>>,
    page: AtomicUsize,
    op_latency: Duration,
    discover_latency: Duration,
    discover_fails: bool,
    auth_errors: Mutex<VecDeque<ScrapeError>>,
    landing_ready: bool,
    calls: Mutex<Vec<(&'static str, Instant)>>,
    fetched: AtomicUsize,
    cancel_after_fetches: Option<(usize, CancellationToken)>,
}

impl ScriptedDriver {
    fn new(pages: Vec<Vec<ItemRef>>) -> Self {
        Self {
            pages,
            page: AtomicUsize::new(0),
            op_latency: Duration::ZERO,
            discover_latency: Duration::ZERO,
            discover_fails: false,
            auth_errors: Mutex::new(VecDeque::new()),
            landing_ready: true,
            calls: Mutex::new(Vec::new()),
            fetched: AtomicUsize::new(0),
            cancel_after_fetches: None,
        }
    }

    async fn enter(&self, call: &'static str, latency: Duration) {
        self.calls.lock().unwrap().push((call, Instant::now()));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn calls_to(&self, call: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| *name == call)
            .count()
    }
}

#[async_trait]
impl PlatformDriver for ScriptedDriver {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<(), ScrapeError> {
        self.enter("authenticate", self.op_latency).await;
        match self.auth_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn is_authenticated(&self) -> Result<bool, ScrapeError> {
        Ok(self.landing_ready)
    }

    async fn open_target(&self, _url: &str) -> Result<(), ScrapeError> {
        self.enter("open_target", self.op_latency).await;
        Ok(())
    }

    async fn content_ready(&self) -> Result<bool, ScrapeError> {
        Ok(true)
    }

    async fn discover_items(&self) -> Result<Vec<ItemRef>, ScrapeError> {
        self.enter("discover_items", self.discover_latency).await;
        if self.discover_fails {
            return Err(ScrapeError::ItemDiscovery {
                reason: "feed container missing".to_string(),
            });
        }
        let page = self.page.load(Ordering::SeqCst);
        Ok(self.pages.get(page).cloned().unwrap_or_default())
    }

    async fn load_more(&self) -> Result<bool, ScrapeError> {
        self.enter("load_more", self.op_latency).await;
        let next = self.page.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(next < self.pages.len())
    }

    async fn fetch_metadata(&self, item: &ItemRef) -> Result<ItemMetadata, ScrapeError> {
        self.enter("fetch_metadata", self.op_latency).await;
        let fetched = self.fetched.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after_fetches {
            if fetched >= *after {
                token.cancel();
            }
        }
        Ok(metadata(&item.item_id))
    }

    fn comment_strategies(&self) -> Vec<CommentStrategy> {
        Vec::new()
    }
}

#[tokio::test(start_paused = true)]
async fn test_limit_three_completes_with_three_items() {
    let driver = ReplayDriver::new(capture(&[&["A", "B"], &["C", "D", "E"]]));
    let sink = Arc::new(RecordingSink::default());

    let session = ScrapeSession::new(target(3), options(), credentials(), driver)
        .unwrap()
        .with_sink(sink.clone());
    let report = session.run().await;

    assert_eq!(report.terminal_state, SessionState::Completed);
    assert!(report.reason.is_none());
    assert_eq!(ids(&report), vec!["A", "B", "C"]);
    assert_eq!(sink.last_batch(), vec!["A", "B", "C"]);
    assert_eq!(report.summary.item_count, 3);
    assert_eq!(report.summary.items_per_kind["post"], 3);
    assert!(report.flush_errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_comment_fallback_uses_second_strategy() {
    let mut feed = capture(&[&["A"]]);
    feed.strategies = vec![
        "embedded_json".to_string(),
        "dom".to_string(),
        "api".to_string(),
    ];
    let comments: Vec<Comment> = (1..=5)
        .map(|n| Comment::new(format!("fan{}", n), format!("comment number {}", n)))
        .collect();
    feed.items.get_mut("A").unwrap().comment_sources = vec![
        CommentSource {
            strategy: "embedded_json".to_string(),
            error: Some("script tag missing".to_string()),
            ..Default::default()
        },
        CommentSource {
            strategy: "dom".to_string(),
            comments,
            ..Default::default()
        },
        CommentSource {
            strategy: "api".to_string(),
            comments: vec![Comment::new("never", "should not appear")],
            ..Default::default()
        },
    ];

    let session =
        ScrapeSession::new(target(1), options(), credentials(), ReplayDriver::new(feed)).unwrap();
    let report = session.run().await;

    assert_eq!(report.terminal_state, SessionState::Completed);
    assert_eq!(report.items[0].comments.len(), 5);
    assert!(report.items[0]
        .comments
        .iter()
        .all(|c| c.author != "never"));
    assert_eq!(report.summary.strategy_successes["dom"], 1);
    assert!(!report.summary.strategy_successes.contains_key("api"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_collection_hits_deadline() {
    let mut driver = ScriptedDriver::new(vec![vec![post("A"), post("B")]]);
    driver.discover_latency = Duration::from_secs(5);

    let session = ScrapeSession::new(
        target(5),
        options().with_timeout(Duration::from_secs(2)),
        credentials(),
        driver,
    )
    .unwrap();
    let started = Instant::now();
    let report = session.run().await;

    assert_eq!(report.terminal_state, SessionState::DeadlineExceeded);
    assert_eq!(report.error_kind.as_deref(), Some("DeadlineExceeded"));
    assert!(report.items.is_empty());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_fail_with_zero_items() {
    let mut feed = capture(&[&["A", "B"]]);
    feed.auth = AuthOutcome::Rejected;
    let sink = Arc::new(RecordingSink::default());

    let report = ScrapeSession::new(target(2), options(), credentials(), ReplayDriver::new(feed))
        .unwrap()
        .with_sink(sink.clone())
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("AuthenticationError"));
    assert!(report.reason.unwrap().starts_with("AuthenticationError"));
    assert!(report.items.is_empty());
    // The empty result set is still flushed
    assert_eq!(sink.batches.lock().unwrap().len(), 1);
    assert!(sink.last_batch().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_login_failure_is_retried() {
    let driver = Arc::new(ScriptedDriver::new(vec![vec![post("A")]]));
    driver
        .auth_errors
        .lock()
        .unwrap()
        .push_back(ScrapeError::TransientNetwork {
            operation: "authenticate".to_string(),
            reason: "connection reset".to_string(),
        });

    let report = ScrapeSession::new(target(1), options(), credentials(), SharedDriver(driver.clone()))
        .unwrap()
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Completed);
    assert_eq!(ids(&report), vec!["A"]);
    assert_eq!(driver.calls_to("authenticate"), 2);
    assert_eq!(report.summary.retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_are_submitted_once() {
    let driver = Arc::new(ScriptedDriver::new(vec![vec![post("A")]]));
    driver
        .auth_errors
        .lock()
        .unwrap()
        .push_back(ScrapeError::Authentication {
            reason: "incorrect password".to_string(),
        });

    let report = ScrapeSession::new(target(1), options(), credentials(), SharedDriver(driver.clone()))
        .unwrap()
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("AuthenticationError"));
    assert_eq!(driver.calls_to("authenticate"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_login_timeouts_escalate_to_authentication_error() {
    let driver = Arc::new(ScriptedDriver::new(vec![vec![post("A")]]));
    for _ in 0..3 {
        driver
            .auth_errors
            .lock()
            .unwrap()
            .push_back(ScrapeError::PageTimeout {
                operation: "authenticate".to_string(),
                waited_ms: 10_000,
            });
    }

    let report = ScrapeSession::new(target(1), options(), credentials(), SharedDriver(driver.clone()))
        .unwrap()
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("AuthenticationError"));
    assert_eq!(driver.calls_to("authenticate"), 3);
    assert!(report.items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_login_wait() {
    let token = CancellationToken::new();
    let mut driver = ScriptedDriver::new(vec![vec![post("A")]]);
    driver.landing_ready = false;

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let report = ScrapeSession::new(target(1), options(), credentials(), driver)
        .unwrap()
        .with_cancellation(token)
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Cancelled);
    // Seen on the next poll, well before the 30 s login wait runs out
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_challenge_and_stalled_login_are_authentication_errors() {
    for outcome in [AuthOutcome::Challenge, AuthOutcome::Stalled] {
        let mut feed = capture(&[&["A"]]);
        feed.auth = outcome;

        let report =
            ScrapeSession::new(target(1), options(), credentials(), ReplayDriver::new(feed))
                .unwrap()
                .run()
                .await;

        assert_eq!(report.terminal_state, SessionState::Failed);
        assert_eq!(report.error_kind.as_deref(), Some("AuthenticationError"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_content_is_navigation_error() {
    let mut feed = capture(&[&["A"]]);
    feed.content_ready = false;

    let report = ScrapeSession::new(target(1), options(), credentials(), ReplayDriver::new(feed))
        .unwrap()
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("NavigationError"));
}

#[tokio::test(start_paused = true)]
async fn test_rediscovered_items_are_not_duplicated() {
    // Pages overlap and the replay feed keeps earlier pages visible
    let driver = ReplayDriver::new(capture(&[&["A", "B"], &["B", "C"], &["C", "A", "D"]]));

    let report = ScrapeSession::new(target(10), options(), credentials(), driver)
        .unwrap()
        .run()
        .await;

    let found = ids(&report);
    let unique: HashSet<_> = found.iter().collect();
    assert_eq!(report.terminal_state, SessionState::Completed);
    assert_eq!(found.len(), unique.len());
    assert_eq!(found, vec!["A", "B", "C", "D"]);
    assert!(report.summary.duplicates_skipped > 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_mid_extraction_flushes_completed_items() {
    let page: Vec<ItemRef> = (0..10).map(|n| post(&format!("P{}", n))).collect();
    let mut driver = ScriptedDriver::new(vec![page]);
    driver.op_latency = Duration::from_secs(1);
    let sink = Arc::new(RecordingSink::default());

    let report = ScrapeSession::new(
        target(10),
        options()
            .with_timeout(Duration::from_millis(7_500))
            .with_action_delay(Duration::ZERO, Duration::ZERO),
        credentials(),
        driver,
    )
    .unwrap()
    .with_sink(sink.clone())
    .run()
    .await;

    assert_eq!(report.terminal_state, SessionState::DeadlineExceeded);
    assert!(!report.items.is_empty());
    assert!(report.items.len() < 10);
    assert_eq!(sink.last_batch(), ids(&report));
}

#[tokio::test(start_paused = true)]
async fn test_no_operation_starts_after_deadline() {
    let page: Vec<ItemRef> = (0..20).map(|n| post(&format!("P{}", n))).collect();
    let mut driver = ScriptedDriver::new(vec![page]);
    driver.op_latency = Duration::from_millis(700);
    let driver = Arc::new(driver);

    let timeout = Duration::from_secs(9);
    let started = Instant::now();
    let report = ScrapeSession::new(
        target(20),
        options().with_timeout(timeout),
        credentials(),
        SharedDriver(driver.clone()),
    )
    .unwrap()
    .run()
    .await;

    assert_eq!(report.terminal_state, SessionState::DeadlineExceeded);
    let calls = driver.calls.lock().unwrap();
    assert!(!calls.is_empty());
    for (call, at) in calls.iter() {
        assert!(
            *at < started + timeout,
            "{} started {:?} after session start",
            call,
            *at - started
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_run() {
    let driver = ReplayDriver::new(capture(&[&["A"]]));
    let session = ScrapeSession::new(target(1), options(), credentials(), driver).unwrap();
    session.cancel_handle().cancel();

    let report = session.run().await;
    assert_eq!(report.terminal_state, SessionState::Cancelled);
    assert!(report.items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_finishes_in_flight_item() {
    let token = CancellationToken::new();
    let page: Vec<ItemRef> = (0..5).map(|n| post(&format!("P{}", n))).collect();
    let mut driver = ScriptedDriver::new(vec![page]);
    driver.cancel_after_fetches = Some((2, token.clone()));

    let report = ScrapeSession::new(target(5), options(), credentials(), driver)
        .unwrap()
        .with_cancellation(token)
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Cancelled);
    // The second item was in flight when cancellation arrived
    assert_eq!(ids(&report), vec!["P0", "P1"]);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_errors_count_as_idle_rounds() {
    let mut driver = ScriptedDriver::new(vec![vec![post("A")]]);
    driver.discover_fails = true;

    let report = ScrapeSession::new(target(3), options(), credentials(), driver)
        .unwrap()
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Completed);
    assert!(report.items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_and_missing_items_skipped() {
    let mut feed = capture(&[&["A", "B", "C"]]);
    feed.items.get_mut("A").unwrap().transient_failures = 2;
    feed.items.get_mut("B").unwrap().metadata = None;

    let report = ScrapeSession::new(target(3), options(), credentials(), ReplayDriver::new(feed))
        .unwrap()
        .run()
        .await;

    assert_eq!(report.terminal_state, SessionState::Completed);
    assert_eq!(ids(&report), vec!["A", "C"]);
    assert_eq!(report.summary.retries, 2);
    assert_eq!(report.summary.items_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_boilerplate_comments_never_reach_results() {
    let mut feed = capture(&[&["A"]]);
    feed.strategies = vec!["dom".to_string()];
    feed.items.get_mut("A").unwrap().comment_sources = vec![CommentSource {
        strategy: "dom".to_string(),
        comments: vec![
            Comment::new("ui", "Original audio"),
            Comment::new("ui", "See translation"),
            Comment::new("ui", "View all 4 replies"),
            Comment::new("fan", " "),
            Comment::new("fan", "x"),
            Comment::new("fan", "what a view"),
        ],
        ..Default::default()
    }];

    let report = ScrapeSession::new(target(1), options(), credentials(), ReplayDriver::new(feed))
        .unwrap()
        .run()
        .await;

    let comments = &report.items[0].comments;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].text, "what a view");
}

#[tokio::test(start_paused = true)]
async fn test_comments_truncated_to_target_maximum() {
    let mut feed = capture(&[&["A"]]);
    feed.strategies = vec!["dom".to_string()];
    feed.items.get_mut("A").unwrap().comment_sources = vec![CommentSource {
        strategy: "dom".to_string(),
        comments: (0..8)
            .map(|n| Comment::new("fan", format!("comment {}", n)))
            .collect(),
        ..Default::default()
    }];

    let report = ScrapeSession::new(
        target(1).with_comments(true, 3),
        options(),
        credentials(),
        ReplayDriver::new(feed),
    )
    .unwrap()
    .run()
    .await;

    assert_eq!(report.items[0].comments.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_store_handle_outlives_session() {
    let driver = ReplayDriver::new(capture(&[&["A", "B"]]));
    let session = ScrapeSession::new(target(2), options(), credentials(), driver).unwrap();
    let store = session.store_handle();

    let report = session.run().await;
    assert_eq!(store.len().await, report.items.len());
}

/// Lets a test keep a handle on a driver the session owns.
struct SharedDriver(Arc<ScriptedDriver>);

#[async_trait]
impl PlatformDriver for SharedDriver {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ScrapeError> {
        self.0.authenticate(credentials).await
    }

    async fn is_authenticated(&self) -> Result<bool, ScrapeError> {
        self.0.is_authenticated().await
    }

    async fn open_target(&self, url: &str) -> Result<(), ScrapeError> {
        self.0.open_target(url).await
    }

    async fn content_ready(&self) -> Result<bool, ScrapeError> {
        self.0.content_ready().await
    }

    async fn discover_items(&self) -> Result<Vec<ItemRef>, ScrapeError> {
        self.0.discover_items().await
    }

    async fn load_more(&self) -> Result<bool, ScrapeError> {
        self.0.load_more().await
    }

    async fn fetch_metadata(&self, item: &ItemRef) -> Result<ItemMetadata, ScrapeError> {
        self.0.fetch_metadata(item).await
    }

    fn comment_strategies(&self) -> Vec<CommentStrategy> {
        self.0.comment_strategies()
    }
}
