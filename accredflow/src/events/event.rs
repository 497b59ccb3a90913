//! Typed pipeline lifecycle events.

use chrono::NaiveDate;
use serde::Serialize;

use crate::core::{PipelineState, StageStatus};

/// Something that happened during an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// An execution was created.
    #[serde(rename = "pipeline.started")]
    PipelineStarted {
        /// The execution.
        execution_id: String,
        /// The date expiry is measured against.
        as_of_date: NaiveDate,
    },

    /// The state machine moved.
    #[serde(rename = "pipeline.transition")]
    Transition {
        /// The execution.
        execution_id: String,
        /// Previous state.
        from: PipelineState,
        /// New state.
        to: PipelineState,
    },

    /// A stage attempt is starting.
    #[serde(rename = "stage.attempt")]
    StageAttempt {
        /// The execution.
        execution_id: String,
        /// The stage.
        stage: String,
        /// One-based attempt number.
        attempt: u32,
    },

    /// A stage attempt failed transiently and will be retried.
    #[serde(rename = "stage.retry")]
    StageRetry {
        /// The execution.
        execution_id: String,
        /// The stage.
        stage: String,
        /// The attempt that failed.
        attempt: u32,
        /// Delay before the next attempt.
        delay_ms: u64,
        /// Why the attempt failed.
        reason: String,
    },

    /// A stage reached its terminal result.
    #[serde(rename = "stage.completed")]
    StageCompleted {
        /// The execution.
        execution_id: String,
        /// The stage.
        stage: String,
        /// Terminal status.
        status: StageStatus,
        /// Attempts made.
        attempts: u32,
        /// Wall time across attempts.
        duration_ms: f64,
    },

    /// Tier notifications were dispatched.
    #[serde(rename = "dispatch.completed")]
    DispatchCompleted {
        /// The execution.
        execution_id: String,
        /// Notifications published.
        published: usize,
        /// Facilities already notified by this execution.
        duplicates_suppressed: usize,
        /// Notifications that failed.
        failures: usize,
    },

    /// The execution finished successfully.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted {
        /// The execution.
        execution_id: String,
        /// Where it was archived.
        archive_location: String,
    },

    /// The execution failed.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed {
        /// The execution.
        execution_id: String,
        /// State whose work failed.
        state: PipelineState,
        /// Taxonomy name of the error.
        kind: String,
        /// Error message.
        message: String,
    },
}

impl PipelineEvent {
    /// Dotted event type, e.g. `stage.retry`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PipelineStarted { .. } => "pipeline.started",
            Self::Transition { .. } => "pipeline.transition",
            Self::StageAttempt { .. } => "stage.attempt",
            Self::StageRetry { .. } => "stage.retry",
            Self::StageCompleted { .. } => "stage.completed",
            Self::DispatchCompleted { .. } => "dispatch.completed",
            Self::PipelineCompleted { .. } => "pipeline.completed",
            Self::PipelineFailed { .. } => "pipeline.failed",
        }
    }

    /// The execution the event belongs to.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        match self {
            Self::PipelineStarted { execution_id, .. }
            | Self::Transition { execution_id, .. }
            | Self::StageAttempt { execution_id, .. }
            | Self::StageRetry { execution_id, .. }
            | Self::StageCompleted { execution_id, .. }
            | Self::DispatchCompleted { execution_id, .. }
            | Self::PipelineCompleted { execution_id, .. }
            | Self::PipelineFailed { execution_id, .. } => execution_id,
        }
    }

    /// JSON rendering including the `type` tag.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .unwrap_or_else(|_| serde_json::json!({"type": self.event_type()}))
    }
}
