use crate::fingerprint::AntiDetectionProfile;
use crate::pipeline::ExtractionStrategy;
use async_trait::async_trait;
use gleaner_core::{Comment, Credentials, ItemMetadata, ItemRef, ScrapeError};

/// Handle passed to comment strategies for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentTarget {
    pub item: ItemRef,
    pub max_comments: usize,
}

pub type CommentStrategy = Box<dyn ExtractionStrategy<CommentTarget, Comment>>;

/// Platform-specific browser automation behind a session.
///
/// Methods take `&self`: a driver wraps a page or client handle that is
/// already internally synchronized, and the session owns it exclusively.
/// Every method is one network-equivalent operation; the session handles
/// rate limiting, retries and the deadline around each call.
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    /// Applies the fingerprint before anything is loaded.
    async fn prepare(&self, _profile: &AntiDetectionProfile) -> Result<(), ScrapeError> {
        Ok(())
    }

    /// Submits credentials. `Authentication` or `VerificationChallenge` on refusal.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ScrapeError>;

    /// True once the authenticated landing state is visible.
    async fn is_authenticated(&self) -> Result<bool, ScrapeError>;

    async fn open_target(&self, url: &str) -> Result<(), ScrapeError>;

    /// True once the target's content container is reachable.
    async fn content_ready(&self) -> Result<bool, ScrapeError>;

    /// Item refs visible in the current view, in page order.
    async fn discover_items(&self) -> Result<Vec<ItemRef>, ScrapeError>;

    /// Pages further. `Ok(false)` means the feed has nothing more to load.
    async fn load_more(&self) -> Result<bool, ScrapeError>;

    async fn fetch_metadata(&self, item: &ItemRef) -> Result<ItemMetadata, ScrapeError>;

    /// Comment strategies in priority order.
    fn comment_strategies(&self) -> Vec<CommentStrategy>;
}
