//! The analytical engine seam.
//!
//! Stages 1, 2 and 4 run as queries on an external analytical engine. The
//! engine is asynchronous: a query is started, then polled until it reaches
//! a terminal state, at which point its output has been written to storage.

mod client;
mod query;

pub use client::DataStageClient;
pub use query::{
    QueryParams, QueryTemplate, StageQueries, STAGE1_FACILITY_SNAPSHOT, STAGE2_EXPIRING,
    STAGE4_AGGREGATE,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// A request to run one stage query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The stage the query belongs to.
    pub stage_name: String,
    /// Fully rendered query text.
    pub query: String,
    /// The as-of date the query was rendered for.
    pub as_of_date: NaiveDate,
    /// Storage prefix the engine writes results under.
    pub output_prefix: String,
}

/// Where a completed stage wrote its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHandle {
    /// Engine-assigned query identifier.
    pub query_id: String,
    /// Storage key of the newline-delimited output.
    pub output_location: String,
    /// Rows the engine reported.
    pub row_count: u64,
}

impl StageHandle {
    /// Creates a stage handle.
    #[must_use]
    pub fn new(
        query_id: impl Into<String>,
        output_location: impl Into<String>,
        row_count: u64,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            output_location: output_location.into(),
            row_count,
        }
    }
}

/// State of a started query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    /// Queued or executing.
    Running,
    /// Finished; output is readable.
    Succeeded {
        /// Storage key of the output.
        output_location: String,
        /// Rows written.
        row_count: u64,
    },
    /// Finished unsuccessfully.
    Failed(EngineError),
}

/// An external analytical engine.
#[async_trait]
pub trait AnalyticalEngine: Send + Sync {
    /// Starts a query and returns its identifier.
    async fn start_query(&self, request: &QueryRequest) -> Result<String, EngineError>;

    /// Reports the current state of a started query.
    async fn query_state(&self, query_id: &str) -> Result<QueryState, EngineError>;
}
