//! Pipeline configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. [`load_config`] layers a JSON file and `ACCREDFLOW_*`
//! environment variables over the defaults and validates the result.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::classify::TierThresholds;
use crate::engine::StageQueries;
use crate::errors::AccredflowError;
use crate::notify::ChannelBindings;
use crate::observability::{LogFormat, LoggingConfig};
use crate::pipeline::RetryConfig;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retry policy shared by the engine stages.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Bound on a single stage attempt, in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// How often a running engine query is polled, in milliseconds.
    #[serde(default = "default_status_check_interval_ms")]
    pub status_check_interval_ms: u64,
    /// Notice window for classification; equals the medium threshold.
    #[serde(default = "default_notice_window_days")]
    pub notice_window_days: i64,
    /// Look-ahead window of the Stage 2 pre-filter.
    #[serde(default = "default_prefilter_window_days")]
    pub prefilter_window_days: i64,
    /// Tier boundaries.
    #[serde(default)]
    pub tier_thresholds: TierThresholds,
    /// Notification channel names.
    #[serde(default)]
    pub channels: ChannelBindings,
    /// Upper bound on concurrent publishes within a tier.
    #[serde(default = "default_max_concurrent_publishes")]
    pub max_concurrent_publishes: usize,
    /// Bound on a single publish, in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Storage prefix the engine writes stage outputs under.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// Storage prefix archives are staged under.
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,
    /// Storage prefix finished archives are published under.
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    /// Stage query templates.
    #[serde(default)]
    pub queries: StageQueries,
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_stage_timeout_ms() -> u64 {
    15 * 60 * 1000
}

fn default_status_check_interval_ms() -> u64 {
    5000
}

fn default_notice_window_days() -> i64 {
    90
}

fn default_prefilter_window_days() -> i64 {
    180
}

fn default_max_concurrent_publishes() -> usize {
    8
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_output_prefix() -> String {
    "results".to_string()
}

fn default_staging_prefix() -> String {
    "archive-staging".to_string()
}

fn default_archive_prefix() -> String {
    "archive".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            stage_timeout_ms: default_stage_timeout_ms(),
            status_check_interval_ms: default_status_check_interval_ms(),
            notice_window_days: default_notice_window_days(),
            prefilter_window_days: default_prefilter_window_days(),
            tier_thresholds: TierThresholds::default(),
            channels: ChannelBindings::default(),
            max_concurrent_publishes: default_max_concurrent_publishes(),
            publish_timeout_ms: default_publish_timeout_ms(),
            output_prefix: default_output_prefix(),
            staging_prefix: default_staging_prefix(),
            archive_prefix: default_archive_prefix(),
            queries: StageQueries::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt stage timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stage_timeout_ms = timeout_ms;
        self
    }

    /// Sets the engine polling interval.
    #[must_use]
    pub fn with_status_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.status_check_interval_ms = interval_ms;
        self
    }

    /// Sets the tier thresholds; the notice window follows the medium bound.
    #[must_use]
    pub fn with_tier_thresholds(mut self, thresholds: TierThresholds) -> Self {
        self.notice_window_days = thresholds.medium_days;
        self.tier_thresholds = thresholds;
        self
    }

    /// Sets the channel bindings.
    #[must_use]
    pub fn with_channels(mut self, channels: ChannelBindings) -> Self {
        self.channels = channels;
        self
    }

    /// Sets the publish concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_publishes(mut self, limit: usize) -> Self {
        self.max_concurrent_publishes = limit;
        self
    }

    /// Sets the per-publish timeout.
    #[must_use]
    pub fn with_publish_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.publish_timeout_ms = timeout_ms;
        self
    }

    /// Sets the stage query templates.
    #[must_use]
    pub fn with_queries(mut self, queries: StageQueries) -> Self {
        self.queries = queries;
        self
    }

    /// Per-attempt stage timeout.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Engine polling interval.
    #[must_use]
    pub fn status_check_interval(&self) -> Duration {
        Duration::from_millis(self.status_check_interval_ms)
    }

    /// Per-publish timeout.
    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Checks the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), AccredflowError> {
        if self.retry.max_attempts < 1 {
            return Err(AccredflowError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(AccredflowError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.stage_timeout_ms == 0 || self.publish_timeout_ms == 0 {
            return Err(AccredflowError::Config("timeouts must be positive".to_string()));
        }
        if self.status_check_interval_ms == 0 {
            return Err(AccredflowError::Config(
                "status_check_interval_ms must be positive".to_string(),
            ));
        }
        self.tier_thresholds.validate()?;
        if self.notice_window_days != self.tier_thresholds.medium_days {
            return Err(AccredflowError::Config(format!(
                "notice_window_days ({}) must equal tier_thresholds.medium_days ({})",
                self.notice_window_days, self.tier_thresholds.medium_days
            )));
        }
        if self.prefilter_window_days < self.notice_window_days {
            return Err(AccredflowError::Config(format!(
                "prefilter_window_days ({}) must cover the notice window ({})",
                self.prefilter_window_days, self.notice_window_days
            )));
        }
        if self.max_concurrent_publishes == 0 {
            return Err(AccredflowError::Config(
                "max_concurrent_publishes must be at least 1".to_string(),
            ));
        }
        if self.channels.all().iter().any(|name| name.trim().is_empty()) {
            return Err(AccredflowError::Config("channel names must not be empty".to_string()));
        }
        for (name, prefix) in [
            ("output_prefix", &self.output_prefix),
            ("staging_prefix", &self.staging_prefix),
            ("archive_prefix", &self.archive_prefix),
        ] {
            if prefix.trim_matches('/').is_empty() {
                return Err(AccredflowError::Config(format!("{name} must not be empty")));
            }
        }
        if self.staging_prefix.trim_matches('/') == self.archive_prefix.trim_matches('/') {
            return Err(AccredflowError::Config(
                "staging_prefix and archive_prefix must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies `ACCREDFLOW_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ACCREDFLOW_MAX_ATTEMPTS") {
            self.retry.max_attempts = value
                .trim()
                .parse()
                .with_context(|| format!("ACCREDFLOW_MAX_ATTEMPTS is not a number: {value}"))?;
        }
        if let Some(value) = lookup("ACCREDFLOW_STAGE_TIMEOUT_MS") {
            self.stage_timeout_ms = value
                .trim()
                .parse()
                .with_context(|| format!("ACCREDFLOW_STAGE_TIMEOUT_MS is not a number: {value}"))?;
        }
        if let Some(value) = lookup("ACCREDFLOW_NOTICE_WINDOW_DAYS") {
            let days: i64 = value
                .trim()
                .parse()
                .with_context(|| {
                    format!("ACCREDFLOW_NOTICE_WINDOW_DAYS is not a number: {value}")
                })?;
            self.notice_window_days = days;
            self.tier_thresholds.medium_days = days;
        }
        if let Some(value) = lookup("ACCREDFLOW_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = lookup("ACCREDFLOW_LOG_FORMAT") {
            self.logging.format = value.parse::<LogFormat>()?;
        }
        Ok(())
    }
}

/// Loads configuration from an optional JSON file and the environment.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
