//! Offline driver that plays back a recorded feed.
//!
//! A capture is a JSON document:
//!
//! ```json
//! {
//!   "auth": "ok",
//!   "latency_ms": 150,
//!   "strategies": ["embedded_json", "dom"],
//!   "pages": [[{"item_id": "C1", "kind": "post", "url": "https://..."}]],
//!   "items": {
//!     "C1": {
//!       "metadata": {"author": "a", "content": "b", "likes": 3, "comment_count": 1},
//!       "comment_sources": [{"strategy": "dom", "comments": [{"author": "x", "text": "nice"}]}]
//!     }
//!   }
//! }
//! ```
//!
//! Earlier pages stay visible after paging, the way an infinite-scroll feed
//! keeps already rendered items in the DOM.

use crate::driver::{CommentStrategy, CommentTarget, PlatformDriver};
use crate::fingerprint::AntiDetectionProfile;
use crate::pipeline::ExtractionStrategy;
use async_trait::async_trait;
use gleaner_core::{Comment, CoreError, Credentials, ItemMetadata, ItemRef, ScrapeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    #[default]
    Ok,
    Rejected,
    Challenge,
    /// Credentials accepted but the landing page never shows up.
    Stalled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentSource {
    pub strategy: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCapture {
    /// `None` means the item page is gone.
    pub metadata: Option<ItemMetadata>,
    #[serde(default)]
    pub comment_sources: Vec<CommentSource>,
    /// Transient failures served before the metadata loads.
    #[serde(default)]
    pub transient_failures: u32,
}

fn content_ready_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedCapture {
    #[serde(default)]
    pub auth: AuthOutcome,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "content_ready_default")]
    pub content_ready: bool,
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub pages: Vec<Vec<ItemRef>>,
    #[serde(default)]
    pub items: HashMap<String, ItemCapture>,
}

impl Default for FeedCapture {
    fn default() -> Self {
        Self {
            auth: AuthOutcome::Ok,
            latency_ms: 0,
            content_ready: true,
            strategies: Vec::new(),
            pages: Vec::new(),
            items: HashMap::new(),
        }
    }
}

impl FeedCapture {
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

#[derive(Debug)]
pub struct ReplayDriver {
    capture: Arc<FeedCapture>,
    page: AtomicUsize,
    authenticated: AtomicBool,
    opened: AtomicBool,
    failures_served: Mutex<HashMap<String, u32>>,
}

impl ReplayDriver {
    pub fn new(capture: FeedCapture) -> Self {
        Self {
            capture: Arc::new(capture),
            page: AtomicUsize::new(0),
            authenticated: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            failures_served: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(Self::new(FeedCapture::from_json(&raw)?))
    }

    pub fn capture(&self) -> &FeedCapture {
        &self.capture
    }

    async fn simulate_latency(&self) {
        let latency = self.capture.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PlatformDriver for ReplayDriver {
    async fn prepare(&self, profile: &AntiDetectionProfile) -> Result<(), ScrapeError> {
        debug!(
            "Replaying as {} at {}x{} ({})",
            profile.user_agent, profile.viewport_width, profile.viewport_height, profile.locale
        );
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ScrapeError> {
        self.simulate_latency().await;

        if credentials.username.is_empty() {
            return Err(ScrapeError::Authentication {
                reason: "no username supplied".to_string(),
            });
        }

        match self.capture.auth {
            AuthOutcome::Ok => {
                self.authenticated.store(true, Ordering::SeqCst);
                Ok(())
            }
            AuthOutcome::Stalled => Ok(()),
            AuthOutcome::Rejected => Err(ScrapeError::Authentication {
                reason: "credentials rejected".to_string(),
            }),
            AuthOutcome::Challenge => Err(ScrapeError::VerificationChallenge {
                challenge: "checkpoint".to_string(),
            }),
        }
    }

    async fn is_authenticated(&self) -> Result<bool, ScrapeError> {
        Ok(self.authenticated.load(Ordering::SeqCst))
    }

    async fn open_target(&self, url: &str) -> Result<(), ScrapeError> {
        self.simulate_latency().await;

        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason: "redirected to login".to_string(),
            });
        }
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn content_ready(&self) -> Result<bool, ScrapeError> {
        Ok(self.opened.load(Ordering::SeqCst) && self.capture.content_ready)
    }

    async fn discover_items(&self) -> Result<Vec<ItemRef>, ScrapeError> {
        self.simulate_latency().await;

        let upto = self.page.load(Ordering::SeqCst);
        Ok(self
            .capture
            .pages
            .iter()
            .take(upto + 1)
            .flatten()
            .cloned()
            .collect())
    }

    async fn load_more(&self) -> Result<bool, ScrapeError> {
        self.simulate_latency().await;

        let current = self.page.load(Ordering::SeqCst);
        if current + 1 < self.capture.pages.len() {
            self.page.store(current + 1, Ordering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn fetch_metadata(&self, item: &ItemRef) -> Result<ItemMetadata, ScrapeError> {
        self.simulate_latency().await;

        let unavailable = |reason: &str| ScrapeError::ItemUnavailable {
            item_id: item.item_id.clone(),
            reason: reason.to_string(),
        };

        let capture = self
            .capture
            .items
            .get(&item.item_id)
            .ok_or_else(|| unavailable("not in capture"))?;

        {
            let mut served = self
                .failures_served
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let count = served.entry(item.item_id.clone()).or_insert(0);
            if *count < capture.transient_failures {
                *count += 1;
                return Err(ScrapeError::TransientNetwork {
                    operation: "fetch_metadata".to_string(),
                    reason: "connection reset".to_string(),
                });
            }
        }

        capture
            .metadata
            .clone()
            .ok_or_else(|| unavailable("page removed"))
    }

    fn comment_strategies(&self) -> Vec<CommentStrategy> {
        self.capture
            .strategies
            .iter()
            .map(|name| {
                Box::new(ReplayCommentStrategy {
                    name: name.clone(),
                    capture: self.capture.clone(),
                }) as CommentStrategy
            })
            .collect()
    }
}

struct ReplayCommentStrategy {
    name: String,
    capture: Arc<FeedCapture>,
}

#[async_trait]
impl ExtractionStrategy<CommentTarget, Comment> for ReplayCommentStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, target: &CommentTarget) -> Result<Vec<Comment>, ScrapeError> {
        let latency = self.capture.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let source = self
            .capture
            .items
            .get(&target.item.item_id)
            .and_then(|item| item.comment_sources.iter().find(|s| s.strategy == self.name));

        match source {
            Some(CommentSource {
                error: Some(reason),
                ..
            }) => Err(ScrapeError::ExtractionStrategy {
                strategy: self.name.clone(),
                reason: reason.clone(),
            }),
            Some(source) => Ok(source
                .comments
                .iter()
                .take(target.max_comments)
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gleaner_core::ItemKind;

    const CAPTURE: &str = r#"{
        "strategies": ["embedded_json", "dom"],
        "pages": [
            [{"item_id": "A", "kind": "post", "url": "https://example.com/p/A"}],
            [{"item_id": "B", "kind": "reel", "url": "https://example.com/reel/B"}]
        ],
        "items": {
            "A": {
                "metadata": {"author": "ana", "content": "hello", "likes": 4, "comment_count": 2},
                "comment_sources": [
                    {"strategy": "embedded_json", "error": "script tag missing"},
                    {"strategy": "dom", "comments": [{"author": "ben", "text": "hi there"}]}
                ]
            },
            "B": {"metadata": null}
        }
    }"#;

    #[test]
    fn test_missing_capture_file() {
        let path = std::env::temp_dir().join(format!("no-capture-{}.json", uuid::Uuid::new_v4()));
        let result = tokio_test::block_on(ReplayDriver::load(&path));
        assert!(matches!(result, Err(CoreError::Io(_))));
    }

    #[test]
    fn test_capture_rejects_bad_json() {
        tokio_test::assert_err!(FeedCapture::from_json("{\"pages\": 3}"));
    }

    #[tokio::test]
    async fn test_capture_parses_with_defaults() {
        let capture = FeedCapture::from_json(CAPTURE).unwrap();
        assert_eq!(capture.auth, AuthOutcome::Ok);
        assert!(capture.content_ready);
        assert_eq!(capture.pages[1][0].kind, ItemKind::Reel);
    }

    #[tokio::test]
    async fn test_paging_keeps_earlier_items_visible() {
        let driver = ReplayDriver::new(FeedCapture::from_json(CAPTURE).unwrap());

        assert_eq!(driver.discover_items().await.unwrap().len(), 1);
        assert!(driver.load_more().await.unwrap());
        assert_eq!(driver.discover_items().await.unwrap().len(), 2);
        assert!(!driver.load_more().await.unwrap());
    }

    #[tokio::test]
    async fn test_auth_outcomes() {
        let credentials = Credentials::new("user", "secret");

        let driver = ReplayDriver::new(FeedCapture::from_json(CAPTURE).unwrap());
        assert!(driver.open_target("https://example.com").await.is_err());
        driver.authenticate(&credentials).await.unwrap();
        assert!(driver.is_authenticated().await.unwrap());

        let rejected = ReplayDriver::new(FeedCapture {
            auth: AuthOutcome::Challenge,
            ..Default::default()
        });
        assert!(matches!(
            rejected.authenticate(&credentials).await,
            Err(ScrapeError::VerificationChallenge { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_metadata_is_unavailable() {
        let driver = ReplayDriver::new(FeedCapture::from_json(CAPTURE).unwrap());
        let gone = ItemRef::new("B", ItemKind::Reel, "https://example.com/reel/B");

        assert!(matches!(
            driver.fetch_metadata(&gone).await,
            Err(ScrapeError::ItemUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_comment_strategies_follow_capture() {
        let driver = ReplayDriver::new(FeedCapture::from_json(CAPTURE).unwrap());
        let strategies = driver.comment_strategies();
        let target = CommentTarget {
            item: ItemRef::new("A", ItemKind::Post, "https://example.com/p/A"),
            max_comments: 10,
        };

        assert_eq!(strategies[0].name(), "embedded_json");
        assert!(strategies[0].extract(&target).await.is_err());
        assert_eq!(strategies[1].extract(&target).await.unwrap().len(), 1);
    }
}
