use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a session is pointed at. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub platform: String,
    pub url: String,
    pub item_limit: usize,
    pub extract_comments: bool,
    pub max_comments_per_item: usize,
}

impl ScrapeTarget {
    pub const DEFAULT_MAX_COMMENTS: usize = 50;

    pub fn new(
        platform: impl Into<String>,
        url: impl Into<String>,
        item_limit: usize,
    ) -> Result<Self, CoreError> {
        let target = Self {
            platform: platform.into(),
            url: url.into(),
            item_limit,
            extract_comments: true,
            max_comments_per_item: Self::DEFAULT_MAX_COMMENTS,
        };
        target.validate()?;
        Ok(target)
    }

    pub fn with_comments(mut self, enabled: bool, max_per_item: usize) -> Self {
        self.extract_comments = enabled;
        self.max_comments_per_item = max_per_item;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.platform.trim().is_empty() {
            return Err(CoreError::InvalidInput {
                message: "platform must not be empty".to_string(),
            });
        }
        if self.item_limit == 0 {
            return Err(CoreError::InvalidInput {
                message: "item limit must be greater than zero".to_string(),
            });
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| CoreError::InvalidInput {
            message: format!("invalid target url '{}': {}", self.url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CoreError::InvalidInput {
                message: format!("target url must be http(s), got '{}'", parsed.scheme()),
            });
        }
        Ok(())
    }
}

/// Kind of content unit. Serialized as a bare lowercase string so new
/// platform kinds round-trip without a code change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemKind {
    Post,
    Reel,
    Other(String),
}

impl ItemKind {
    pub fn as_str(&self) -> &str {
        match self {
            ItemKind::Post => "post",
            ItemKind::Reel => "reel",
            ItemKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ItemKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "post" => ItemKind::Post,
            "reel" => ItemKind::Reel,
            _ => ItemKind::Other(value),
        }
    }
}

impl From<&str> for ItemKind {
    fn from(value: &str) -> Self {
        ItemKind::from(value.to_string())
    }
}

impl From<ItemKind> for String {
    fn from(kind: ItemKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item reference found while collecting, before anything is extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: String,
    pub kind: ItemKind,
    pub url: String,
}

impl ItemRef {
    pub fn new(item_id: impl Into<String>, kind: ItemKind, url: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            kind,
            url: url.into(),
        }
    }
}

/// Metadata read from an item's own page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub author: String,
    pub content: String,
    pub likes: u64,
    pub comment_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// One fully extracted content unit. Field order matches the persisted JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub item_id: String,
    pub kind: ItemKind,
    pub author: String,
    pub content: String,
    pub likes: u64,
    pub comment_count: u64,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub comments: Vec<Comment>,
}

impl ExtractedItem {
    pub fn from_parts(item: &ItemRef, metadata: ItemMetadata, comments: Vec<Comment>) -> Self {
        Self {
            item_id: item.item_id.clone(),
            kind: item.kind.clone(),
            author: metadata.author,
            content: metadata.content,
            likes: metadata.likes,
            comment_count: metadata.comment_count,
            url: item.url.clone(),
            timestamp: Utc::now(),
            comments,
        }
    }

    /// Texts handed to the sentiment collaborator: the content first, then
    /// every comment in thread order.
    pub fn sentiment_inputs(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.content.as_str())
            .filter(|text| !text.trim().is_empty())
            .chain(self.comments.iter().map(|c| c.text.as_str()))
    }
}

/// Seam for the external text-polarity scorer. The engine never calls it;
/// consumers score `ExtractedItem::sentiment_inputs` after a run.
pub trait TextPolarityScorer {
    /// Polarity in `-1.0..=1.0`.
    fn score(&self, text: &str) -> f64;
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Authenticating,
    Navigating,
    Collecting,
    Extracting,
    Completed,
    Failed,
    DeadlineExceeded,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Failed
                | SessionState::DeadlineExceeded
                | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Login credentials. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
