//! Pipeline configuration.
//!
//! Every section has defaults matching the public icon service, so
//! `PipelineConfig::default()` is usable as-is. A TOML file only needs to
//! name the fields it overrides:
//!
//! ```toml
//! [client]
//! base_url = "https://xivapi.com"
//! timeout = "5s"
//!
//! [scheduler]
//! rate_limit = 20
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub client: ClientConfig,
    pub scheduler: SchedulerConfig,
    pub loader: LoaderConfig,
    pub fallback: FallbackConfig,
}

/// Remote lookup endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheme and authority of the lookup service.
    pub base_url: String,
    /// Request path; `{id}` is replaced with the identifier.
    pub lookup_path: String,
    /// Prefix joined with the icon path returned by the service.
    pub icon_base: String,
    /// Hard per-call timeout.
    pub timeout: String,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://xivapi.com".to_string(),
            lookup_path: "/item/{id}?fields=icon".to_string(),
            icon_base: "https://xivapi.com".to_string(),
            timeout: "5s".to_string(),
            user_agent: "iconpipe/0.1".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> ConfigResult<Duration> {
        duration_field("client.timeout", &self.timeout)
    }
}

/// Admission control for the remote quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Documented hard limit of the service, per window. The scheduler
    /// admits one fewer.
    pub rate_limit: u32,
    /// Length of the sliding window.
    pub window: String,
    /// Maximum concurrently executing priority calls.
    pub priority_concurrency: usize,
    /// Minimum spacing between two priority admissions.
    pub priority_stagger: String,
    /// Pause after the first quota rejection.
    pub initial_backoff: String,
    /// Ceiling for the doubled pause.
    pub max_backoff: String,
    /// Quota rejections retried before surfacing `QuotaExceeded`.
    pub max_quota_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rate_limit: 20,
            window: "1s".to_string(),
            priority_concurrency: 5,
            priority_stagger: "5ms".to_string(),
            initial_backoff: "2s".to_string(),
            max_backoff: "10s".to_string(),
            max_quota_retries: 5,
        }
    }
}

impl SchedulerConfig {
    /// Admissions allowed per window: one below the documented limit.
    pub fn quota(&self) -> u32 {
        self.rate_limit.saturating_sub(1).max(1)
    }

    pub fn window(&self) -> ConfigResult<Duration> {
        duration_field("scheduler.window", &self.window)
    }

    pub fn priority_stagger(&self) -> ConfigResult<Duration> {
        duration_field("scheduler.priority_stagger", &self.priority_stagger)
    }

    pub fn initial_backoff(&self) -> ConfigResult<Duration> {
        duration_field("scheduler.initial_backoff", &self.initial_backoff)
    }

    pub fn max_backoff(&self) -> ConfigResult<Duration> {
        duration_field("scheduler.max_backoff", &self.max_backoff)
    }

    /// Minimum spacing between two background admissions.
    pub fn min_interval(&self) -> ConfigResult<Duration> {
        Ok(self.window()? / self.quota())
    }
}

/// Per-consumer retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Transient retries before falling back.
    pub max_retries: u32,
    /// Retry `n` (zero-based) waits `(n + 1) * retry_delay`.
    pub retry_delay: String,
    /// Initial delays at or above this keep the controller idle.
    pub defer_threshold: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: "500ms".to_string(),
            defer_threshold: "60s".to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn retry_delay(&self) -> ConfigResult<Duration> {
        duration_field("loader.retry_delay", &self.retry_delay)
    }

    pub fn defer_threshold(&self) -> ConfigResult<Duration> {
        duration_field("loader.defer_threshold", &self.defer_threshold)
    }
}

/// Deterministic alternate icon locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub base_url: String,
    /// Path templates; `{folder}` and `{id}` expand to zero-padded digits.
    pub templates: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            base_url: "https://xivapi.com".to_string(),
            templates: vec![
                "/i/{folder}/{id}.png".to_string(),
                "/i/{folder}/{id}_hr1.png".to_string(),
            ],
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field that would otherwise fail at first use.
    pub fn validate(&self) -> ConfigResult<()> {
        self.client.timeout()?;
        self.scheduler.window()?;
        self.scheduler.priority_stagger()?;
        self.loader.retry_delay()?;
        self.loader.defer_threshold()?;

        if !self.client.base_url.starts_with("http://")
            && !self.client.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                field: "client.base_url",
                reason: format!("expected an http(s) URL, got {:?}", self.client.base_url),
            });
        }
        if !self.client.lookup_path.contains("{id}") {
            return Err(ConfigError::Invalid {
                field: "client.lookup_path",
                reason: "must contain the {id} placeholder".to_string(),
            });
        }
        if self.scheduler.rate_limit < 2 {
            return Err(ConfigError::Invalid {
                field: "scheduler.rate_limit",
                reason: "must be at least 2 to leave a safety margin".to_string(),
            });
        }
        if self.scheduler.priority_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.priority_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        let initial = self.scheduler.initial_backoff()?;
        let max = self.scheduler.max_backoff()?;
        if initial.is_zero() {
            return Err(ConfigError::Invalid {
                field: "scheduler.initial_backoff",
                reason: "must be greater than zero".to_string(),
            });
        }
        if max < initial {
            return Err(ConfigError::Invalid {
                field: "scheduler.max_backoff",
                reason: format!("{max:?} is below initial_backoff {initial:?}"),
            });
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}
