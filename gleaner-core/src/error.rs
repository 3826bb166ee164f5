use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while driving a scrape session.
///
/// Only `Authentication`, `VerificationChallenge` and `Navigation` end a
/// session as failed; everything else is scoped to one item, one strategy
/// or one paging round.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Verification challenge presented: {challenge}")]
    VerificationChallenge { challenge: String },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Item discovery failed: {reason}")]
    ItemDiscovery { reason: String },

    #[error("Strategy {strategy} failed: {reason}")]
    ExtractionStrategy { strategy: String, reason: String },

    #[error("Item {item_id} unavailable: {reason}")]
    ItemUnavailable { item_id: String, reason: String },

    #[error("Transient network failure during {operation}: {reason}")]
    TransientNetwork { operation: String, reason: String },

    #[error("Timed out after {waited_ms}ms waiting for {operation}")]
    PageTimeout { operation: String, waited_ms: u64 },

    #[error("Rate limited by platform. Retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Malformed target: {details}")]
    MalformedTarget { details: String },

    #[error("Session deadline exceeded")]
    DeadlineExceeded,

    #[error("Session cancelled by caller")]
    Cancelled,
}

impl ScrapeError {
    /// True for the errors that end a session in the `Failed` state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::Authentication { .. }
                | ScrapeError::VerificationChallenge { .. }
                | ScrapeError::Navigation { .. }
        )
    }

    /// True for the planned early-termination signals.
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, ScrapeError::DeadlineExceeded | ScrapeError::Cancelled)
    }

    /// Converts a transient failure whose retries ran out into the error kind
    /// of the enclosing operation. Non-transient errors pass through unchanged.
    pub fn escalate<F>(self, into: F) -> ScrapeError
    where
        F: FnOnce(String) -> ScrapeError,
    {
        let transient = matches!(
            self,
            ScrapeError::TransientNetwork { .. }
                | ScrapeError::PageTimeout { .. }
                | ScrapeError::RateLimited { .. }
        );
        if transient {
            into(self.to_string())
        } else {
            self
        }
    }

    /// Short name of the taxonomy bucket, used in session reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Authentication { .. } | ScrapeError::VerificationChallenge { .. } => {
                "AuthenticationError"
            }
            ScrapeError::Navigation { .. } => "NavigationError",
            ScrapeError::ItemDiscovery { .. } => "ItemDiscoveryError",
            ScrapeError::ExtractionStrategy { .. } => "ExtractionStrategyError",
            ScrapeError::ItemUnavailable { .. } => "ItemUnavailableError",
            ScrapeError::TransientNetwork { .. }
            | ScrapeError::PageTimeout { .. }
            | ScrapeError::RateLimited { .. } => "TransientNetworkError",
            ScrapeError::MalformedTarget { .. } => "MalformedTargetError",
            ScrapeError::DeadlineExceeded => "DeadlineExceeded",
            ScrapeError::Cancelled => "Cancelled",
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Migration failed: {migration}")]
    MigrationFailed { migration: String },

    #[error("Query execution failed: {query}")]
    QueryFailed { query: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Database locked")]
    DatabaseLocked,

    #[error("Sink {sink} rejected batch with status {status_code}")]
    SinkRejected { sink: String, status_code: u16 },

    #[error("Sink {sink} unreachable: {reason}")]
    SinkUnreachable { sink: String, reason: String },

    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {details}")]
    InvalidFormat { details: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Permission denied accessing config: {path}")]
    PermissionDenied { path: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
