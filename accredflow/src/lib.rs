//! # Accredflow
//!
//! Accreditation expiry monitoring for healthcare facilities.
//!
//! A run moves through four stages:
//!
//! - **Stage 1**: snapshot the facility catalog on the analytical engine
//! - **Stage 2**: pre-filter facilities with accreditations nearing expiry
//! - **Classify and dispatch**: assign an urgency tier per facility and
//!   notify the tier's channel, once per facility per execution
//! - **Stage 4**: aggregate expiry statistics
//!
//! Completed runs are archived atomically; failed runs stop at the first
//! unrecoverable error and raise one operational alert.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use accredflow::prelude::*;
//!
//! let config = load_config(None)?;
//! init_tracing(&config.logging)?;
//!
//! let orchestrator = PipelineOrchestrator::new(config, engine, store, channel)?;
//! let outcome = orchestrator.trigger(TriggerRequest::new()).await;
//! println!("{} finished {}", outcome.execution_id(), outcome.status());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod classify;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod extract;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod storage;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::classify::{ExpiryClassifier, TierThresholds};
    pub use crate::config::{load_config, PipelineConfig};
    pub use crate::core::{
        ExecutionStatus, PipelineExecution, PipelineState, StageResult, StageStatus,
    };
    pub use crate::engine::{AnalyticalEngine, QueryRequest, QueryState, StageHandle};
    pub use crate::errors::{
        AccredflowError, ArchiveError, EngineError, ParseError, PublishError, StorageError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::extract::RecordExtractor;
    pub use crate::model::{ClassifiedFacility, FacilityRecord, Tier, TierCounts};
    pub use crate::notify::{ChannelBindings, NotificationChannel, NotificationPayload};
    pub use crate::observability::{init_tracing, LoggingConfig};
    pub use crate::pipeline::{ExecutionOutcome, PipelineOrchestrator, RetryConfig, TriggerRequest};
    pub use crate::storage::{FsObjectStore, InMemoryObjectStore, ObjectStore};
}
