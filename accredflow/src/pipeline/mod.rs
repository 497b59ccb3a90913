//! Pipeline orchestration.
//!
//! This module provides:
//! - Retry policy and backoff calculation
//! - The per-stage timeout and retry executor
//! - The state machine that sequences the four stages

mod executor;
mod orchestrator;
mod report;
mod retry;


pub use executor::{StageExecutor, StagePolicy};
pub use orchestrator::PipelineOrchestrator;
pub use report::{ExecutionOutcome, ExecutionReport, FacilityOutcome, TriggerRequest};
pub use retry::{
    decide, AttemptOutcome, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState,
};
