//! The per-run execution record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExecutionStatus, PipelineState, StageResult};
use crate::errors::AccredflowError;

/// Where and why an execution stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// The state whose work failed.
    pub state: PipelineState,
    /// Taxonomy name of the error.
    pub kind: String,
    /// Human readable error message.
    pub message: String,
}

/// One end-to-end run of the pipeline.
///
/// Stage results are append-only. A failed execution keeps every stage that
/// completed before the failure so it can be inspected after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    /// Unique identifier; every side effect of the run is keyed on it.
    pub execution_id: String,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// The date expiry is measured against.
    pub as_of_date: NaiveDate,
    stage_results: Vec<StageResult>,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Final archive location, set only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_archive_location: Option<String>,
    /// Point of failure, set only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    /// Creates a running execution with a fresh, time-ordered identifier.
    #[must_use]
    pub fn new(as_of_date: NaiveDate) -> Self {
        Self::with_id(Uuid::now_v7().to_string(), as_of_date)
    }

    /// Creates a running execution with a caller-chosen identifier.
    #[must_use]
    pub fn with_id(execution_id: impl Into<String>, as_of_date: NaiveDate) -> Self {
        Self {
            execution_id: execution_id.into(),
            started_at: Utc::now(),
            as_of_date,
            stage_results: Vec::new(),
            status: ExecutionStatus::Running,
            final_archive_location: None,
            failure: None,
            finished_at: None,
        }
    }

    /// Appends a stage result.
    pub fn record_stage(&mut self, result: StageResult) {
        self.stage_results.push(result);
    }

    /// Returns the stage results in completion order.
    #[must_use]
    pub fn stage_results(&self) -> &[StageResult] {
        &self.stage_results
    }

    /// Returns the result recorded for a stage.
    #[must_use]
    pub fn stage_result(&self, stage_name: &str) -> Option<&StageResult> {
        self.stage_results
            .iter()
            .find(|result| result.stage_name == stage_name)
    }

    /// Marks the execution succeeded with its archive location.
    pub fn mark_succeeded(&mut self, archive_location: impl Into<String>) {
        self.status = ExecutionStatus::Succeeded;
        self.final_archive_location = Some(archive_location.into());
        self.finished_at = Some(Utc::now());
    }

    /// Marks the execution failed at `state`.
    pub fn mark_failed(&mut self, state: PipelineState, error: &AccredflowError) {
        self.status = ExecutionStatus::Failed;
        self.final_archive_location = None;
        self.failure = Some(ExecutionFailure {
            state,
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        self.finished_at = Some(Utc::now());
    }

    /// Total attempts across every recorded stage.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.stage_results.iter().map(|r| r.attempt_count).sum()
    }
}
