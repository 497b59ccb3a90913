//! States of the pipeline state machine.
//!
//! The happy path is linear:
//! `INIT -> STAGE1 -> STAGE2 -> CLASSIFY_DISPATCH -> STAGE4 -> ARCHIVE -> DONE`.
//! `FAILED` is reachable from every non-terminal state and is the only
//! other exit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A state of the pipeline orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Execution record created, nothing run yet.
    Init,
    /// Facility snapshot stage.
    Stage1,
    /// Expiring-accreditation pre-filter stage.
    Stage2,
    /// In-process extraction, classification and tier dispatch.
    ClassifyDispatch,
    /// Aggregate stage.
    Stage4,
    /// Archival of every stage output and the report.
    Archive,
    /// Completed successfully.
    Done,
    /// Stopped on an unrecoverable failure.
    Failed,
}

impl PipelineState {
    /// Every state in happy-path order, followed by `Failed`.
    pub const ALL: [Self; 8] = [
        Self::Init,
        Self::Stage1,
        Self::Stage2,
        Self::ClassifyDispatch,
        Self::Stage4,
        Self::Archive,
        Self::Done,
        Self::Failed,
    ];

    /// Returns the successor on the happy path, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Stage1),
            Self::Stage1 => Some(Self::Stage2),
            Self::Stage2 => Some(Self::ClassifyDispatch),
            Self::ClassifyDispatch => Some(Self::Stage4),
            Self::Stage4 => Some(Self::Archive),
            Self::Archive => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the machine may move from `self` to `to`.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Stage1 => "STAGE1",
            Self::Stage2 => "STAGE2",
            Self::ClassifyDispatch => "CLASSIFY_DISPATCH",
            Self::Stage4 => "STAGE4",
            Self::Archive => "ARCHIVE",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
