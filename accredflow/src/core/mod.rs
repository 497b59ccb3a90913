//! Core domain model types for accredflow.
//!
//! This module contains the execution bookkeeping shared by every component:
//! - Stage and execution status enums
//! - The pipeline state machine states
//! - Stage results and the per-run execution record

mod execution;
mod stage_result;
mod state;
mod status;

pub use execution::{ExecutionFailure, PipelineExecution};
pub use stage_result::StageResult;
pub use state::PipelineState;
pub use status::{ExecutionStatus, StageStatus};
