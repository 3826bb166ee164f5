//! Engine configuration loaded from TOML with environment overrides.
//!
//! Every section has defaults so a minimal file only needs `[target] url`.
//! Credentials are never read from the file, only from the environment.

use crate::error::{ConfigError, CoreError};
use crate::types::{Credentials, ScrapeTarget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_PATH_VAR: &str = "GLEANER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "gleaner.toml";
pub const USERNAME_VAR: &str = "GLEANER_USERNAME";
pub const PASSWORD_VAR: &str = "GLEANER_PASSWORD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub target: TargetSection,
    pub session: SessionSection,
    pub rate_limit: RateLimitSection,
    pub retry: RetrySection,
    pub anti_detection: AntiDetectionSection,
    pub comments: CommentSection,
    pub output: OutputSection,
    pub driver: DriverSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSection {
    pub platform: String,
    pub url: Option<String>,
    pub item_limit: usize,
    pub extract_comments: bool,
    pub max_comments_per_item: usize,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            platform: "instagram".to_string(),
            url: None,
            item_limit: 10,
            extract_comments: true,
            max_comments_per_item: ScrapeTarget::DEFAULT_MAX_COMMENTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Global wall-clock budget for the whole run.
    pub timeout_secs: u64,
    pub auth_timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Consecutive paging rounds without new items before collection stops.
    pub max_idle_pages: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            auth_timeout_secs: 30,
            ready_timeout_secs: 20,
            poll_interval_ms: 500,
            max_idle_pages: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            burst_capacity: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiDetectionSection {
    pub min_action_delay_ms: u64,
    pub max_action_delay_ms: u64,
}

impl Default for AntiDetectionSection {
    fn default() -> Self {
        Self {
            min_action_delay_ms: 800,
            max_action_delay_ms: 2500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentSection {
    pub min_length: usize,
    /// Added to the built-in boilerplate patterns.
    pub extra_boilerplate_patterns: Vec<String>,
}

impl Default for CommentSection {
    fn default() -> Self {
        Self {
            min_length: 2,
            extra_boilerplate_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub json_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub ingest_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSection {
    /// Recorded feed capture replayed instead of a live platform.
    pub replay_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Loads from `$GLEANER_CONFIG`, falling back to `gleaner.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ConfigError::PermissionDenied {
                path: path.display().to_string(),
            },
            _ => ConfigError::InvalidFormat {
                details: e.to_string(),
            },
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies `GLEANER_TARGET_URL`, `GLEANER_ITEM_LIMIT` and
    /// `GLEANER_TIMEOUT_SECS` as resolved by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GLEANER_TARGET_URL") {
            self.target.url = Some(url);
        }
        if let Some(limit) = lookup("GLEANER_ITEM_LIMIT") {
            self.target.item_limit = parse_number("GLEANER_ITEM_LIMIT", &limit)?;
        }
        if let Some(timeout) = lookup("GLEANER_TIMEOUT_SECS") {
            self.session.timeout_secs = parse_number("GLEANER_TIMEOUT_SECS", &timeout)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.url.is_none() {
            return Err(ConfigError::MissingField {
                field: "target.url".to_string(),
            });
        }
        if self.target.item_limit == 0 {
            return Err(invalid("target.item_limit", "0"));
        }
        if self.session.timeout_secs == 0 {
            return Err(invalid("session.timeout_secs", "0"));
        }
        if self.session.poll_interval_ms == 0 {
            return Err(invalid("session.poll_interval_ms", "0"));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(invalid("rate_limit.requests_per_minute", "0"));
        }
        if self.rate_limit.burst_capacity == 0 {
            return Err(invalid("rate_limit.burst_capacity", "0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(invalid(
                "retry.jitter_factor",
                &self.retry.jitter_factor.to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                &self.retry.backoff_multiplier.to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationFailed {
                reason: "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            });
        }
        if self.anti_detection.min_action_delay_ms > self.anti_detection.max_action_delay_ms {
            return Err(ConfigError::ValidationFailed {
                reason: "anti_detection.min_action_delay_ms exceeds max_action_delay_ms"
                    .to_string(),
            });
        }
        for pattern in &self.comments.extra_boilerplate_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(ConfigError::InvalidValue {
                    field: "comments.extra_boilerplate_patterns".to_string(),
                    value: format!("{} ({})", pattern, e),
                });
            }
        }
        Ok(())
    }

    pub fn scrape_target(&self) -> Result<ScrapeTarget, CoreError> {
        let url = self.target.url.clone().ok_or_else(|| ConfigError::MissingField {
            field: "target.url".to_string(),
        })?;
        Ok(
            ScrapeTarget::new(self.target.platform.clone(), url, self.target.item_limit)?
                .with_comments(
                    self.target.extract_comments,
                    self.target.max_comments_per_item,
                ),
        )
    }
}

pub fn credentials_from_env() -> Result<Credentials, ConfigError> {
    credentials_from(|name| std::env::var(name).ok())
}

pub fn credentials_from<F>(lookup: F) -> Result<Credentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let username = lookup(USERNAME_VAR).ok_or_else(|| ConfigError::MissingEnvironmentVariable {
        var_name: USERNAME_VAR.to_string(),
    })?;
    let password = lookup(PASSWORD_VAR).ok_or_else(|| ConfigError::MissingEnvironmentVariable {
        var_name: PASSWORD_VAR.to_string(),
    })?;
    Ok(Credentials::new(username, password))
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(field, value))
}

fn invalid(field: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}
