use crate::config::CONFIG_PATH_VAR;
use crate::error::*;
use std::time::Duration;
use tracing::{error, info, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Scrape(e) => {
                error!("Scrape error details: {:?}", e);
            }
            CoreError::Persistence(e) => {
                error!("Persistence error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Scrape(e) => e.is_retryable(),
            CoreError::Persistence(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Scrape(e) => e.retry_after(),
            CoreError::Persistence(e) => e.retry_after(),
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Scrape(e) => e.user_friendly_message(),
            CoreError::Persistence(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { message } => format!("Invalid input: {}", message),
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Scrape(_) => "SCRAPE".to_string(),
            CoreError::Persistence(_) => "PERSISTENCE".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for ScrapeError {
    fn log_error(&self) -> &Self {
        error!("ScrapeError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ScrapeError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::TransientNetwork { .. }
                | ScrapeError::PageTimeout { .. }
                | ScrapeError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ScrapeError::RateLimited { retry_after_ms } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ScrapeError::Authentication { .. } => {
                "Login was rejected. Please check your credentials.".to_string()
            }
            ScrapeError::VerificationChallenge { .. } => {
                "The platform asked for an extra verification step. Complete it in a browser and try again."
                    .to_string()
            }
            ScrapeError::Navigation { url, .. } => format!("Could not open {}.", url),
            ScrapeError::DeadlineExceeded => {
                "The run hit its time limit. Partial results were kept.".to_string()
            }
            ScrapeError::Cancelled => "The run was cancelled. Partial results were kept.".to_string(),
            ScrapeError::RateLimited { retry_after_ms } => format!(
                "The platform is throttling requests. Please wait {} seconds.",
                retry_after_ms / 1000
            ),
            ScrapeError::MalformedTarget { details } => format!("Invalid target: {}", details),
            _ => "A page could not be read. The run continued without it.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            ScrapeError::Authentication { .. } => "SCRAPE_AUTH_FAILED".to_string(),
            ScrapeError::VerificationChallenge { .. } => "SCRAPE_VERIFICATION".to_string(),
            ScrapeError::Navigation { .. } => "SCRAPE_NAVIGATION".to_string(),
            ScrapeError::ItemDiscovery { .. } => "SCRAPE_DISCOVERY".to_string(),
            ScrapeError::ExtractionStrategy { .. } => "SCRAPE_STRATEGY".to_string(),
            ScrapeError::ItemUnavailable { .. } => "SCRAPE_ITEM_UNAVAILABLE".to_string(),
            ScrapeError::TransientNetwork { .. } => "SCRAPE_TRANSIENT".to_string(),
            ScrapeError::PageTimeout { .. } => "SCRAPE_TIMEOUT".to_string(),
            ScrapeError::RateLimited { .. } => "SCRAPE_RATE_LIMITED".to_string(),
            ScrapeError::MalformedTarget { .. } => "SCRAPE_MALFORMED_TARGET".to_string(),
            ScrapeError::DeadlineExceeded => "SCRAPE_DEADLINE".to_string(),
            ScrapeError::Cancelled => "SCRAPE_CANCELLED".to_string(),
        }
    }
}

impl ErrorExt for PersistenceError {
    fn log_error(&self) -> &Self {
        error!("PersistenceError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("PersistenceError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            PersistenceError::DatabaseLocked => true,
            PersistenceError::SinkUnreachable { .. } => true,
            PersistenceError::SinkRejected { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PersistenceError::DatabaseLocked => Some(Duration::from_millis(100)),
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            PersistenceError::ConnectionFailed { .. } => {
                "Could not open the results database.".to_string()
            }
            PersistenceError::DatabaseLocked => {
                "The results database is busy. Please try again.".to_string()
            }
            PersistenceError::SinkRejected { sink, status_code } => {
                format!("{} refused the results (status {}).", sink, status_code)
            }
            PersistenceError::SinkUnreachable { sink, .. } => {
                format!("Could not reach {}.", sink)
            }
            PersistenceError::WriteFailed { path, .. } => {
                format!("Could not write results to {}.", path)
            }
            _ => "Saving results failed. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            PersistenceError::ConnectionFailed { .. } => "PERSIST_CONNECTION_FAILED".to_string(),
            PersistenceError::MigrationFailed { .. } => "PERSIST_MIGRATION_FAILED".to_string(),
            PersistenceError::QueryFailed { .. } => "PERSIST_QUERY_FAILED".to_string(),
            PersistenceError::TransactionFailed { .. } => "PERSIST_TRANSACTION_FAILED".to_string(),
            PersistenceError::DatabaseLocked => "PERSIST_LOCKED".to_string(),
            PersistenceError::SinkRejected { .. } => "PERSIST_SINK_REJECTED".to_string(),
            PersistenceError::SinkUnreachable { .. } => "PERSIST_SINK_UNREACHABLE".to_string(),
            PersistenceError::WriteFailed { .. } => "PERSIST_WRITE_FAILED".to_string(),
            PersistenceError::Encode(_) => "PERSIST_ENCODE".to_string(),
            PersistenceError::Sql(_) => "PERSIST_SQL".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError [{}]: {}", self.error_code(), self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError [{}]: {}", self.error_code(), self);
        self
    }

    // A bad config never fixes itself between attempts
    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => format!(
                "No configuration at '{}'. Copy gleaner.example.toml there or set {}.",
                path, CONFIG_PATH_VAR
            ),
            ConfigError::PermissionDenied { path } => format!("Cannot read '{}'.", path),
            ConfigError::InvalidFormat { details } => {
                format!("The configuration could not be read: {}", details)
            }
            ConfigError::Parse(e) => format!("The configuration is not valid TOML: {}", e),
            ConfigError::MissingField { field } => format!("Set '{}' in the configuration.", field),
            ConfigError::InvalidValue { field, value } => {
                format!("'{}' cannot be {}.", field, value)
            }
            ConfigError::ValidationFailed { reason } => format!("Inconsistent settings: {}.", reason),
            ConfigError::MissingEnvironmentVariable { var_name } => {
                format!("Export {} before starting a run.", var_name)
            }
        }
    }

    fn error_code(&self) -> String {
        let code = match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND",
            ConfigError::PermissionDenied { .. } => "CONFIG_PERMISSION_DENIED",
            ConfigError::InvalidFormat { .. } | ConfigError::Parse(_) => "CONFIG_UNREADABLE",
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD",
            ConfigError::InvalidValue { .. } | ConfigError::ValidationFailed { .. } => {
                "CONFIG_INVALID"
            }
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR",
        };
        code.to_string()
    }
}

/// Logs a run-ending error with its code, the message shown to the
/// operator, and the retry hint when there is one.
pub fn report_error(error: &CoreError) {
    error.log_error();
    info!("Error code: {}", error.error_code());
    info!("{}", error.user_friendly_message());
    if let Some(retry_after) = error.retry_after().filter(|_| error.is_retryable()) {
        info!("Retrying after {:?} may succeed", retry_after);
    }
}
