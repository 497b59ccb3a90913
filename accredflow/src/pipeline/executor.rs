//! Timeout and retry wrapper around one pipeline stage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::{decide, AttemptOutcome, RetryConfig, RetryDecision, RetryState};
use crate::core::{PipelineExecution, StageResult};
use crate::engine::StageHandle;
use crate::errors::EngineError;
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::observability::SpanTimer;

/// How a stage is retried and bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePolicy {
    /// Retry policy.
    pub retry: RetryConfig,
    /// Bound on each attempt.
    pub timeout: Duration,
}

impl StagePolicy {
    /// Creates a policy with exponential backoff from `base_backoff`.
    #[must_use]
    pub fn new(max_attempts: u32, base_backoff: Duration, timeout: Duration) -> Self {
        let base_ms = u64::try_from(base_backoff.as_millis()).unwrap_or(u64::MAX);
        Self {
            retry: RetryConfig::new()
                .with_max_attempts(max_attempts)
                .with_base_delay_ms(base_ms)
                .with_max_delay_ms(base_ms.max(RetryConfig::default().max_delay_ms)),
            timeout,
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Runs stages under a [`StagePolicy`] and records their results.
#[derive(Clone)]
pub struct StageExecutor {
    policy: StagePolicy,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor that reports to no sink.
    #[must_use]
    pub fn new(policy: StagePolicy) -> Self {
        Self {
            policy,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    /// Runs `stage_name` until it succeeds, fails fatally or runs out of
    /// attempts, then appends exactly one [`StageResult`] to `execution`.
    ///
    /// `invoke` receives the one-based attempt number. An attempt that
    /// outlives the policy timeout counts as a transient failure.
    pub async fn run<F, Fut>(
        &self,
        execution: &mut PipelineExecution,
        stage_name: &str,
        mut invoke: F,
    ) -> StageResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<StageHandle, EngineError>>,
    {
        let execution_id = execution.execution_id.clone();
        let stage_timer = SpanTimer::start(stage_name);
        let mut state = RetryState::new();
        let mut attempt: u32 = 1;

        let result = loop {
            self.events.try_emit(PipelineEvent::StageAttempt {
                execution_id: execution_id.clone(),
                stage: stage_name.to_string(),
                attempt,
            });

            let attempt_timer = SpanTimer::start(format!("{stage_name}#{attempt}"));
            let outcome = match tokio::time::timeout(self.policy.timeout, invoke(attempt)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(EngineError::transient(format!(
                    "stage attempt timed out after {}ms",
                    self.policy.timeout.as_millis()
                ))),
            };
            debug!(
                execution_id = %execution_id,
                stage = %stage_name,
                attempt,
                duration_ms = attempt_timer.finish(),
                success = outcome.is_ok(),
                "Stage attempt finished"
            );

            let decision = decide(AttemptOutcome::of(&outcome), attempt, &self.policy.retry);
            match (outcome, decision) {
                (Ok(handle), _) => {
                    let elapsed_ms = stage_timer.elapsed_ms();
                    break StageResult::succeeded(stage_name, attempt, &handle, elapsed_ms);
                }
                (Err(error), RetryDecision::Retry(backoff)) => {
                    let delay = state.jitter(backoff, &self.policy.retry);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    warn!(
                        execution_id = %execution_id,
                        stage = %stage_name,
                        attempt,
                        delay_ms,
                        error = %error,
                        "Transient stage failure, retrying"
                    );
                    self.events.try_emit(PipelineEvent::StageRetry {
                        execution_id: execution_id.clone(),
                        stage: stage_name.to_string(),
                        attempt,
                        delay_ms,
                        reason: error.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                (Err(error), _) => {
                    warn!(
                        execution_id = %execution_id,
                        stage = %stage_name,
                        attempts = attempt,
                        error = %error,
                        retryable = error.is_retryable(),
                        "Stage failed"
                    );
                    break StageResult::failed(stage_name, attempt, error, stage_timer.elapsed_ms());
                }
            }
        };

        info!(
            execution_id = %execution_id,
            stage = %stage_name,
            status = %result.status,
            attempts = result.attempt_count,
            duration_ms = result.duration_ms,
            "Stage completed"
        );
        self.events.try_emit(PipelineEvent::StageCompleted {
            execution_id,
            stage: stage_name.to_string(),
            status: result.status,
            attempts: result.attempt_count,
            duration_ms: result.duration_ms,
        });

        execution.record_stage(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::events::CollectingEventSink;
    use crate::pipeline::JitterStrategy;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn execution() -> PipelineExecution {
        PipelineExecution::with_id("exec-1", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    }

    fn policy(max_attempts: u32) -> StagePolicy {
        StagePolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(200))
            .with_retry(
                RetryConfig::new()
                    .with_max_attempts(max_attempts)
                    .with_base_delay_ms(1)
                    .with_max_delay_ms(5)
                    .with_jitter(JitterStrategy::None),
            )
    }

    fn handle() -> StageHandle {
        StageHandle::new("q-1", "results/exec-1/stage1/q-1.jsonl", 4)
    }

    async fn run_script(
        executor: &StageExecutor,
        execution: &mut PipelineExecution,
        script: Vec<Result<StageHandle, EngineError>>,
    ) -> (StageResult, u32) {
        let script = Mutex::new(VecDeque::from(script));
        let calls = Mutex::new(0u32);
        let result = executor
            .run(execution, "stage1", |_attempt| {
                *calls.lock() += 1;
                let next = script
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| Err(EngineError::query("script exhausted")));
                async move { next }
            })
            .await;
        let calls = *calls.lock();
        (result, calls)
    }

    #[tokio::test]
    async fn test_transient_transient_success() {
        let executor = StageExecutor::new(policy(3));
        let mut execution = execution();

        let (result, calls) = run_script(
            &executor,
            &mut execution,
            vec![
                Err(EngineError::transient("throttled")),
                Err(EngineError::transient("throttled")),
                Ok(handle()),
            ],
        )
        .await;

        assert_eq!(calls, 3);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(result.status, StageStatus::Succeeded);
        assert_eq!(execution.stage_results().len(), 1);
    }

    #[tokio::test]
    async fn test_query_error_fails_without_retry() {
        let executor = StageExecutor::new(policy(3));
        let mut execution = execution();

        let (result, calls) = run_script(
            &executor,
            &mut execution,
            vec![Err(EngineError::query("SYNTAX_ERROR")), Ok(handle())],
        )
        .await;

        assert_eq!(calls, 1);
        assert_eq!(result.attempt_count, 1);
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error, Some(EngineError::query("SYNTAX_ERROR")));
    }

    #[tokio::test]
    async fn test_exhausted_retries_record_last_error() {
        let executor = StageExecutor::new(policy(2));
        let mut execution = execution();

        let (result, calls) = run_script(
            &executor,
            &mut execution,
            vec![
                Err(EngineError::transient("first")),
                Err(EngineError::transient("second")),
                Ok(handle()),
            ],
        )
        .await;

        assert_eq!(calls, 2);
        assert_eq!(result.attempt_count, 2);
        assert_eq!(result.error, Some(EngineError::transient("second")));
        assert_eq!(execution.stage_results().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut policy = policy(2);
        policy.timeout = Duration::from_millis(20);
        let executor = StageExecutor::new(policy).with_event_sink(sink.clone());
        let mut execution = execution();

        let result = executor
            .run(&mut execution, "stage2", |attempt| async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(handle())
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempt_count, 2);
        assert_eq!(sink.events_of_type("stage.retry").len(), 1);
        assert_eq!(
            sink.event_types(),
            vec!["stage.attempt", "stage.retry", "stage.attempt", "stage.completed"]
        );
    }
}
