//! Trigger requests and execution outcomes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{ExecutionStatus, PipelineExecution, PipelineState};
use crate::errors::ParseError;
use crate::model::{ClassifiedFacility, FacilityMetrics, Tier, TierCounts};
use crate::notify::DispatchReport;
use crate::storage::ArchiveManifest;

/// A request to run the pipeline once.
///
/// An empty request runs for today's date under a fresh execution id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    /// The date expiry is measured against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of_date: Option<NaiveDate>,
    /// Reuse a specific execution id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl TriggerRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the as-of date.
    #[must_use]
    pub fn with_as_of_date(mut self, as_of_date: NaiveDate) -> Self {
        self.as_of_date = Some(as_of_date);
        self
    }

    /// Sets the execution id.
    #[must_use]
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }
}

/// Per-facility line of the classification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityOutcome {
    /// The facility.
    pub facility_id: String,
    /// Its display name.
    pub facility_name: String,
    /// Assigned tier.
    pub tier: Tier,
    /// Soonest valid expiry, in days.
    pub days_until_expiry: Option<i64>,
    /// Accreditations excluded for unparsable dates.
    pub invalid_dates: usize,
    /// Derived metrics.
    pub metrics: FacilityMetrics,
}

impl From<&ClassifiedFacility> for FacilityOutcome {
    fn from(facility: &ClassifiedFacility) -> Self {
        Self {
            facility_id: facility.facility_id().to_string(),
            facility_name: facility.facility.facility_name.clone(),
            tier: facility.tier,
            days_until_expiry: facility.days_until_expiry,
            invalid_dates: facility.invalid_dates,
            metrics: facility.metrics(),
        }
    }
}

/// Classification and dispatch report for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// The execution.
    pub execution_id: String,
    /// The as-of date.
    pub as_of_date: Option<NaiveDate>,
    /// Facilities in the Stage 1 snapshot.
    pub facilities_processed: usize,
    /// Facilities returned by the Stage 2 pre-filter.
    pub candidates: usize,
    /// Malformed records skipped across extracted outputs.
    pub records_skipped: usize,
    /// One entry per skipped Stage 2 record.
    pub parse_errors: Vec<ParseError>,
    /// Accreditations excluded for unparsable dates.
    pub invalid_dates: usize,
    /// Candidates per tier.
    pub tier_counts: TierCounts,
    /// Dispatch outcome, once dispatch ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchReport>,
    /// Classified candidates.
    pub facilities: Vec<FacilityOutcome>,
}

impl ExecutionReport {
    /// Creates an empty report for an execution.
    #[must_use]
    pub fn new(execution_id: impl Into<String>, as_of_date: NaiveDate) -> Self {
        Self {
            execution_id: execution_id.into(),
            as_of_date: Some(as_of_date),
            ..Self::default()
        }
    }

    /// Facilities in a dispatchable tier.
    #[must_use]
    pub fn expiring_found(&self) -> usize {
        self.tier_counts.dispatchable()
    }

    /// Notifications that failed to publish.
    #[must_use]
    pub fn dispatch_failures(&self) -> usize {
        self.dispatch.as_ref().map_or(0, |d| d.failures.len())
    }
}

/// Everything a trigger returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// The execution record, including partial progress on failure.
    pub execution: PipelineExecution,
    /// The state the machine stopped in.
    pub final_state: PipelineState,
    /// Classification and dispatch report.
    pub report: ExecutionReport,
    /// Archive manifest, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveManifest>,
}

impl ExecutionOutcome {
    /// Returns true if the execution succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.execution.status == ExecutionStatus::Succeeded
    }

    /// The execution id.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution.execution_id
    }

    /// The execution status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }
}
