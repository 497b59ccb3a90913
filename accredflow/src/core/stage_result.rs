//! The recorded outcome of one pipeline stage.

use serde::{Deserialize, Serialize};

use super::StageStatus;
use crate::engine::StageHandle;
use crate::errors::EngineError;

/// The terminal outcome of a stage, as appended to the execution record.
///
/// Only the last attempt's outcome is kept; `attempt_count` reflects every
/// attempt that was made to get there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Name of the stage.
    pub stage_name: String,
    /// Total attempts made, including the terminal one.
    pub attempt_count: u32,
    /// Where the engine wrote the stage output (success only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    /// Rows the engine reported (success only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Terminal status.
    pub status: StageStatus,
    /// Terminal error (failure only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    /// Wall time across all attempts, including backoff.
    pub duration_ms: f64,
}

impl StageResult {
    /// Creates a successful result.
    #[must_use]
    pub fn succeeded(
        stage_name: impl Into<String>,
        attempt_count: u32,
        handle: &StageHandle,
        duration_ms: f64,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            attempt_count,
            output_location: Some(handle.output_location.clone()),
            row_count: Some(handle.row_count),
            status: StageStatus::Succeeded,
            error: None,
            duration_ms,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        stage_name: impl Into<String>,
        attempt_count: u32,
        error: EngineError,
        duration_ms: f64,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            attempt_count,
            output_location: None,
            row_count: None,
            status: StageStatus::Failed,
            error: Some(error),
            duration_ms,
        }
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
