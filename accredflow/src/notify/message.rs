//! Notification rendering.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::NotificationPayload;
use crate::core::PipelineExecution;
use crate::model::{ClassifiedFacility, Tier, TierCounts};

fn subject_for(tier: Tier) -> &'static str {
    match tier {
        Tier::Critical => "Critical: Healthcare Accreditations Expiring Soon",
        Tier::High => "High Priority: Healthcare Accreditations Expiring",
        Tier::Medium | Tier::None => "Medium Priority: Healthcare Accreditations Expiring",
    }
}

fn expiry_phrase(days: i64) -> String {
    match days {
        d if d < 0 => format!("expired {} days ago", -d),
        0 => "expires today".to_string(),
        d => format!("expires in {d} days"),
    }
}

/// Renders the notification for one classified facility.
#[must_use]
pub fn facility_notification(
    facility: &ClassifiedFacility,
    execution_id: &str,
    as_of_date: NaiveDate,
    notification_id: &str,
) -> NotificationPayload {
    let tier = facility.tier;
    let record = &facility.facility;

    let mut lines = vec![
        format!("Healthcare Accreditation Alert - {} Priority", tier.label()),
        format!("As of: {}", as_of_date.format("%Y-%m-%d")),
        String::new(),
        format!(
            "The following healthcare facility has {} priority accreditations expiring:",
            tier.label().to_lowercase()
        ),
        String::new(),
        format!("Facility: {}", record.facility_name),
        format!("Location: {}", record.location.city_state()),
    ];
    lines.extend(facility.accreditations_in_tier().map(|accreditation| {
        format!(
            "  - {} {} ({})",
            accreditation.accreditation_body,
            accreditation.accreditation_id,
            expiry_phrase(accreditation.days_until_expiry)
        )
    }));
    lines.push(String::new());
    lines.push("Please take immediate action to renew these accreditations.".to_string());
    let message = lines.join("\n");

    NotificationPayload {
        subject: subject_for(tier).to_string(),
        message,
        attributes: serde_json::json!({
            "notification_id": notification_id,
            "execution_id": execution_id,
            "facility_id": record.facility_id,
            "facility_name": record.facility_name,
            "tier": tier,
            "days_until_expiry": facility.days_until_expiry,
            "accreditations": facility.accreditations_in_tier().collect::<Vec<_>>(),
            "metrics": facility.metrics(),
        }),
    }
}

/// Counts reported when an execution completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessSummary {
    /// The execution.
    pub execution_id: String,
    /// The as-of date.
    pub as_of_date: NaiveDate,
    /// Facilities in the Stage 1 snapshot.
    pub facilities_processed: usize,
    /// Facilities in a dispatchable tier.
    pub expiring_found: usize,
    /// Notifications published per tier.
    pub dispatched: TierCounts,
    /// Notifications that failed to publish.
    pub dispatch_failures: usize,
    /// Records skipped during extraction.
    pub records_skipped: usize,
    /// Where the execution was archived.
    pub archive_location: String,
}

/// Renders the pipeline-success notification.
#[must_use]
pub fn success_summary(summary: &SuccessSummary) -> NotificationPayload {
    let dispatched = &summary.dispatched;
    let message = [
        format!("Accreditation pipeline execution {} succeeded.", summary.execution_id),
        format!("As of: {}", summary.as_of_date.format("%Y-%m-%d")),
        format!("Facilities processed: {}", summary.facilities_processed),
        format!("Expiring accreditations found: {}", summary.expiring_found),
        format!(
            "Notified: {} critical, {} high, {} medium",
            dispatched.critical, dispatched.high, dispatched.medium
        ),
        format!("Dispatch failures: {}", summary.dispatch_failures),
        format!("Records skipped: {}", summary.records_skipped),
        format!("Archive: {}", summary.archive_location),
    ]
    .join("\n");

    NotificationPayload {
        subject: "Healthcare Accreditation Pipeline Succeeded".to_string(),
        message,
        attributes: serde_json::json!({
            "event": "pipeline.succeeded",
            "summary": summary,
        }),
    }
}

/// Renders the pipeline-failure alert.
#[must_use]
pub fn failure_alert(execution: &PipelineExecution) -> NotificationPayload {
    let mut lines = vec![format!(
        "Accreditation pipeline execution {} failed.",
        execution.execution_id
    )];
    if let Some(failure) = &execution.failure {
        lines.push(format!("Failed in state: {}", failure.state));
        lines.push(format!("Error ({}): {}", failure.kind, failure.message));
    }
    lines.push("Stages completed before failure:".to_string());
    lines.extend(execution.stage_results().iter().map(|result| {
        format!(
            "  - {}: {} after {} attempt(s)",
            result.stage_name, result.status, result.attempt_count
        )
    }));
    let message = lines.join("\n");

    NotificationPayload {
        subject: "Healthcare Accreditation Pipeline Failed".to_string(),
        message,
        attributes: serde_json::json!({
            "event": "pipeline.failed",
            "execution_id": execution.execution_id,
            "failure": execution.failure,
            "stage_results": execution.stage_results(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ExpiryClassifier;
    use crate::core::{PipelineState, StageResult};
    use crate::errors::{AccredflowError, EngineError};
    use crate::model::{Accreditation, FacilityRecord, Location};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn classified() -> ClassifiedFacility {
        let mut record = FacilityRecord::new("FAC-1", "Mercy General")
            .with_accreditation(Accreditation::new("JCAHO", "J-1", "2024-03-11"))
            .with_accreditation(Accreditation::new("CAP", "C-1", "2024-02-20"))
            .with_accreditation(Accreditation::new("DNV", "D-1", "2024-12-01"));
        record.location = Location {
            city: Some("Sacramento".to_string()),
            state: Some("CA".to_string()),
            ..Location::default()
        };
        ExpiryClassifier::default().classify(record, as_of())
    }

    #[test]
    fn test_facility_notification_lists_tier_accreditations() {
        let payload = facility_notification(&classified(), "exec-1", as_of(), "idem:abc");

        assert_eq!(payload.subject, "Critical: Healthcare Accreditations Expiring Soon");
        assert!(payload.message.contains("Facility: Mercy General"));
        assert!(payload.message.contains("Location: Sacramento, CA"));
        assert!(payload.message.contains("JCAHO J-1 (expires in 10 days)"));
        assert!(payload.message.contains("CAP C-1 (expired 10 days ago)"));
        assert!(!payload.message.contains("DNV"));
    }

    #[test]
    fn test_facility_notification_attributes() {
        let payload = facility_notification(&classified(), "exec-1", as_of(), "idem:abc");

        assert_eq!(payload.attributes["facility_id"], "FAC-1");
        assert_eq!(payload.attributes["tier"], "CRITICAL");
        assert_eq!(payload.attributes["execution_id"], "exec-1");
        assert_eq!(payload.attributes["notification_id"], "idem:abc");
        assert_eq!(payload.attributes["days_until_expiry"], -10);
        assert_eq!(payload.attributes["accreditations"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_failure_alert_includes_point_of_failure() {
        let mut execution = PipelineExecution::with_id("exec-9", as_of());
        execution.mark_failed(
            PipelineState::Stage2,
            &AccredflowError::from(EngineError::query("permission denied")),
        );
        let payload = failure_alert(&execution);

        assert!(payload.message.contains("Failed in state: STAGE2"));
        assert!(payload.message.contains("QueryError"));
        assert_eq!(payload.attributes["event"], "pipeline.failed");
    }

    #[test]
    fn test_failure_alert_lists_one_line_per_stage() {
        let mut execution = PipelineExecution::with_id("exec-9", as_of());
        execution.record_stage(StageResult::failed(
            "stage1",
            3,
            EngineError::transient("throttled"),
            4.0,
        ));
        execution.mark_failed(
            PipelineState::Stage1,
            &AccredflowError::from(EngineError::transient("throttled")),
        );
        let payload = failure_alert(&execution);
        let lines: Vec<&str> = payload.message.lines().collect();

        assert_eq!(lines[0], "Accreditation pipeline execution exec-9 failed.");
        assert_eq!(lines.last(), Some(&"  - stage1: FAILED after 3 attempt(s)"));
        assert!(!payload.message.ends_with('\n'));
    }

    #[test]
    fn test_success_summary_message() {
        let summary = SuccessSummary {
            execution_id: "exec-2".to_string(),
            as_of_date: as_of(),
            facilities_processed: 12,
            expiring_found: 3,
            dispatched: TierCounts {
                critical: 1,
                high: 1,
                medium: 1,
                none: 0,
            },
            dispatch_failures: 0,
            records_skipped: 1,
            archive_location: "archive/exec-2/".to_string(),
        };
        let payload = success_summary(&summary);

        assert!(payload.message.contains("Facilities processed: 12"));
        assert!(payload.message.contains("Notified: 1 critical, 1 high, 1 medium"));
        assert_eq!(payload.attributes["summary"]["archive_location"], "archive/exec-2/");
    }
}
