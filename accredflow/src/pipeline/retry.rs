//! Retry policy with configurable backoff and jitter strategies.
//!
//! The retry decision is a pure function of the attempt outcome and the
//! attempt number. Jitter is applied afterwards by [`RetryState`], which is
//! the only stateful part.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::EngineError;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Unjittered delay after the given one-based failed attempt.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let step = attempt.saturating_sub(1);

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(step)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt.max(1))),
            BackoffStrategy::Constant => base,
        };

        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Classification of one attempt's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt produced a result.
    Success,
    /// The attempt failed in a way that may clear on retry.
    Transient,
    /// The attempt failed permanently.
    Fatal,
}

impl AttemptOutcome {
    /// Classifies an engine result.
    #[must_use]
    pub fn of<T>(result: &Result<T, EngineError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) if err.is_retryable() => Self::Transient,
            Err(_) => Self::Fatal,
        }
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt succeeded.
    Complete,
    /// Retry after the (unjittered) delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides what follows the one-based `attempt` that ended with `outcome`.
#[must_use]
pub fn decide(outcome: AttemptOutcome, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match outcome {
        AttemptOutcome::Success => RetryDecision::Complete,
        AttemptOutcome::Fatal => RetryDecision::NotRetryable,
        AttemptOutcome::Transient if attempt >= config.max_attempts => RetryDecision::GiveUp,
        AttemptOutcome::Transient => RetryDecision::Retry(config.backoff_delay(attempt)),
    }
}

/// Jitter state for one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    previous_delay_ms: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the configured jitter to a backoff delay.
    pub fn jitter(&mut self, delay: Duration, config: &RetryConfig) -> Duration {
        let delay = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay_ms.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        self.previous_delay_ms = Some(jittered);
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(config.jitter_strategy, JitterStrategy::Full);
    }

    #[test]
    fn test_retry_config_deserialize_partial() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "jitter_strategy": "equal"}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.jitter_strategy, JitterStrategy::Equal);
    }

    #[test]
    fn test_exponential_backoff_doubles_from_base() {
        let config = no_jitter();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant_backoff() {
        let linear = no_jitter().with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.backoff_delay(3), Duration::from_millis(300));

        let constant = no_jitter().with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.backoff_delay(6), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000);
        assert_eq!(config.backoff_delay(11), Duration::from_millis(5000));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_decide_over_outcome_tag() {
        let config = no_jitter().with_max_attempts(3);

        assert_eq!(decide(AttemptOutcome::Success, 1, &config), RetryDecision::Complete);
        assert_eq!(decide(AttemptOutcome::Fatal, 1, &config), RetryDecision::NotRetryable);
        assert_eq!(
            decide(AttemptOutcome::Transient, 1, &config),
            RetryDecision::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            decide(AttemptOutcome::Transient, 2, &config),
            RetryDecision::Retry(Duration::from_millis(200))
        );
        assert_eq!(decide(AttemptOutcome::Transient, 3, &config), RetryDecision::GiveUp);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let config = no_jitter().with_max_attempts(1);
        assert_eq!(decide(AttemptOutcome::Transient, 1, &config), RetryDecision::GiveUp);
    }

    #[test]
    fn test_outcome_of_engine_result() {
        let ok: Result<(), EngineError> = Ok(());
        assert_eq!(AttemptOutcome::of(&ok), AttemptOutcome::Success);
        assert_eq!(
            AttemptOutcome::of::<()>(&Err(EngineError::transient("throttled"))),
            AttemptOutcome::Transient
        );
        assert_eq!(
            AttemptOutcome::of::<()>(&Err(EngineError::query("syntax"))),
            AttemptOutcome::Fatal
        );
    }

    #[test]
    fn test_full_jitter_stays_within_delay() {
        let config = RetryConfig::new().with_base_delay_ms(100);
        let mut state = RetryState::new();

        for _ in 0..20 {
            let delay = state.jitter(Duration::from_millis(100), &config);
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_equal_jitter_keeps_half() {
        let config = RetryConfig::new().with_jitter(JitterStrategy::Equal);
        let mut state = RetryState::new();

        for _ in 0..20 {
            let delay = state.jitter(Duration::from_millis(200), &config);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_decorrelated_jitter_bounded_by_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(250)
            .with_jitter(JitterStrategy::Decorrelated);
        let mut state = RetryState::new();

        for _ in 0..20 {
            let delay = state.jitter(Duration::from_millis(100), &config);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(250));
        }
    }
}
