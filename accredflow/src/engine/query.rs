//! Stage query templates.
//!
//! Templates use `{placeholder}` markers. Rendering substitutes
//! `{as_of_date}`, `{window_days}` and `{execution_id}`; any other marker left
//! in the text is a fatal query error.

use chrono::NaiveDate;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::errors::EngineError;

/// Stage 1: point-in-time facility snapshot.
pub const STAGE1_FACILITY_SNAPSHOT: &str = "stage1_facility_snapshot";
/// Stage 2: facilities with accreditations inside the pre-filter window.
pub const STAGE2_EXPIRING: &str = "stage2_expiring_accreditations";
/// Stage 4: accreditation aggregate over the same snapshot.
pub const STAGE4_AGGREGATE: &str = "stage4_accreditation_summary";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Values available to a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    /// The execution's as-of date.
    pub as_of_date: NaiveDate,
    /// Look-ahead window in days, for stages that filter on one.
    pub window_days: Option<i64>,
    /// The execution identifier.
    pub execution_id: String,
}

/// A named query with placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplate {
    /// Query text.
    pub template: String,
}

impl QueryTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Returns the placeholder names in order of appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<String> {
        PLACEHOLDER
            .captures_iter(&self.template)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Substitutes every placeholder.
    pub fn render(&self, params: &QueryParams) -> Result<String, EngineError> {
        let mut unresolved = Vec::new();
        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &Captures<'_>| {
            match (&caps[1], params.window_days) {
                ("as_of_date", _) => params.as_of_date.format("%Y-%m-%d").to_string(),
                ("window_days", Some(days)) => days.to_string(),
                ("execution_id", _) => params.execution_id.clone(),
                (name, _) => {
                    unresolved.push(name.to_string());
                    caps[0].to_string()
                }
            }
        });

        if unresolved.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(EngineError::query(format!(
                "unresolved query placeholders: {}",
                unresolved.join(", ")
            )))
        }
    }
}

/// The three engine-executed stage queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageQueries {
    /// Stage 1 query.
    #[serde(default = "default_facility_snapshot")]
    pub facility_snapshot: QueryTemplate,
    /// Stage 2 query.
    #[serde(default = "default_expiring")]
    pub expiring_accreditations: QueryTemplate,
    /// Stage 4 query.
    #[serde(default = "default_summary")]
    pub accreditation_summary: QueryTemplate,
}

fn default_facility_snapshot() -> QueryTemplate {
    QueryTemplate::new(
        "SELECT facility_id, facility_name, location, employee_count, services, labs, \
         accreditations \
         FROM healthcare_facilities \
         WHERE snapshot_date <= DATE '{as_of_date}'",
    )
}

fn default_expiring() -> QueryTemplate {
    QueryTemplate::new(
        "SELECT facility_id, facility_name, location, employee_count, services, labs, \
         accreditations \
         FROM healthcare_facilities \
         WHERE snapshot_date <= DATE '{as_of_date}' \
         AND any_match(accreditations, a -> \
         DATE(a.valid_until) <= DATE '{as_of_date}' + INTERVAL '{window_days}' DAY)",
    )
}

fn default_summary() -> QueryTemplate {
    QueryTemplate::new(
        "SELECT location.state AS state, a.accreditation_body AS accreditation_body, \
         COUNT(*) AS accreditations, \
         SUM(CASE WHEN DATE(a.valid_until) <= DATE '{as_of_date}' + INTERVAL '{window_days}' DAY \
         THEN 1 ELSE 0 END) AS expiring \
         FROM healthcare_facilities CROSS JOIN UNNEST(accreditations) AS t(a) \
         WHERE snapshot_date <= DATE '{as_of_date}' \
         GROUP BY 1, 2",
    )
}

impl Default for StageQueries {
    fn default() -> Self {
        Self {
            facility_snapshot: default_facility_snapshot(),
            expiring_accreditations: default_expiring(),
            accreditation_summary: default_summary(),
        }
    }
}

impl StageQueries {
    /// Returns the template for a stage name.
    #[must_use]
    pub fn for_stage(&self, stage_name: &str) -> Option<&QueryTemplate> {
        match stage_name {
            STAGE1_FACILITY_SNAPSHOT => Some(&self.facility_snapshot),
            STAGE2_EXPIRING => Some(&self.expiring_accreditations),
            STAGE4_AGGREGATE => Some(&self.accreditation_summary),
            _ => None,
        }
    }
}
