//! Typed facility records as produced by the extraction stages.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Date format of `valid_until`.
pub const VALID_UNTIL_FORMAT: &str = "%Y-%m-%d";

/// Treats an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Keeps string values and maps anything else to an empty string.
fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Ok(value),
        _ => Ok(String::new()),
    }
}

/// Postal location of a facility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Street address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// City.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// State.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Postal code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

impl Location {
    /// Renders `city, state`, substituting `N/A` for missing parts.
    #[must_use]
    pub fn city_state(&self) -> String {
        format!(
            "{}, {}",
            self.city.as_deref().unwrap_or("N/A"),
            self.state.as_deref().unwrap_or("N/A")
        )
    }
}

/// A laboratory operated by a facility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lab {
    /// Lab name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub lab_name: String,
    /// Certifications held by the lab.
    #[serde(default, deserialize_with = "null_as_default")]
    pub certifications: BTreeSet<String>,
}

/// One accreditation held by a facility.
///
/// `valid_until` is kept as the raw string so a malformed date only excludes
/// this accreditation from classification instead of rejecting the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accreditation {
    /// Issuing body.
    #[serde(default, deserialize_with = "null_as_default")]
    pub accreditation_body: String,
    /// Identifier assigned by the body.
    #[serde(default, deserialize_with = "null_as_default")]
    pub accreditation_id: String,
    /// Expiry date, `YYYY-MM-DD`. A null or non-string value is kept as an
    /// empty string, which never parses.
    #[serde(default, deserialize_with = "string_or_empty")]
    pub valid_until: String,
}

impl Accreditation {
    /// Creates an accreditation.
    #[must_use]
    pub fn new(
        body: impl Into<String>,
        id: impl Into<String>,
        valid_until: impl Into<String>,
    ) -> Self {
        Self {
            accreditation_body: body.into(),
            accreditation_id: id.into(),
            valid_until: valid_until.into(),
        }
    }

    /// Parses `valid_until`, returning `None` when it is not a valid date.
    #[must_use]
    pub fn valid_until_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.valid_until.trim(), VALID_UNTIL_FORMAT).ok()
    }
}

/// A healthcare facility extracted from a stage output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityRecord {
    /// Unique facility identifier.
    pub facility_id: String,
    /// Display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub facility_name: String,
    /// Postal location.
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: Location,
    /// Headcount; missing means zero.
    #[serde(default, deserialize_with = "null_as_default")]
    pub employee_count: u64,
    /// Services offered.
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: BTreeSet<String>,
    /// Labs in source order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labs: Vec<Lab>,
    /// Accreditations in source order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub accreditations: Vec<Accreditation>,
}

/// Derived counts for a facility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacilityMetrics {
    /// Number of services.
    pub total_services: usize,
    /// Number of labs.
    pub total_labs: usize,
    /// Number of accreditations.
    pub total_accreditations: usize,
    /// Accreditations considered active. Records carry no status field, so
    /// every accreditation counts.
    pub active_accreditations: usize,
    /// Employees per offered service, zero when there are no services.
    pub employees_per_service: f64,
}

impl FacilityRecord {
    /// Creates a record with empty collections.
    #[must_use]
    pub fn new(facility_id: impl Into<String>, facility_name: impl Into<String>) -> Self {
        Self {
            facility_id: facility_id.into(),
            facility_name: facility_name.into(),
            location: Location::default(),
            employee_count: 0,
            services: BTreeSet::new(),
            labs: Vec::new(),
            accreditations: Vec::new(),
        }
    }

    /// Adds an accreditation.
    #[must_use]
    pub fn with_accreditation(mut self, accreditation: Accreditation) -> Self {
        self.accreditations.push(accreditation);
        self
    }

    /// Computes the derived metrics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> FacilityMetrics {
        let total_services = self.services.len();
        let employees_per_service = if total_services > 0 {
            self.employee_count as f64 / total_services as f64
        } else {
            0.0
        };

        FacilityMetrics {
            total_services,
            total_labs: self.labs.len(),
            total_accreditations: self.accreditations.len(),
            active_accreditations: self.accreditations.len(),
            employees_per_service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_fields_default_to_empty() {
        let record: FacilityRecord =
            serde_json::from_str(r#"{"facility_id": "FAC-1", "facility_name": "North"}"#).unwrap();

        assert_eq!(record.employee_count, 0);
        assert!(record.services.is_empty());
        assert!(record.labs.is_empty());
        assert!(record.accreditations.is_empty());
        assert_eq!(record.location, Location::default());
    }

    #[test]
    fn test_null_fields_default_to_empty() {
        let record: FacilityRecord = serde_json::from_str(
            r#"{"facility_id": "FAC-1", "employee_count": null, "services": null,
                "labs": [{"lab_name": "Path", "certifications": null}], "accreditations": null}"#,
        )
        .unwrap();

        assert_eq!(record.employee_count, 0);
        assert!(record.services.is_empty());
        assert!(record.labs[0].certifications.is_empty());
        assert!(record.accreditations.is_empty());
    }

    #[test]
    fn test_null_accreditation_strings_default_to_empty() {
        let record: FacilityRecord = serde_json::from_str(
            r#"{"facility_id": "FAC-1", "facility_name": null,
                "labs": [{"lab_name": null}],
                "accreditations": [
                    {"accreditation_body": null, "accreditation_id": null, "valid_until": null},
                    {"accreditation_body": "CAP", "accreditation_id": "C-1",
                     "valid_until": 20240310}
                ]}"#,
        )
        .unwrap();

        assert_eq!(record.facility_name, "");
        assert_eq!(record.labs[0].lab_name, "");
        assert_eq!(record.accreditations[0], Accreditation::default());
        assert_eq!(record.accreditations[1].valid_until, "");
        assert!(record.accreditations[1].valid_until_date().is_none());
    }

    #[test]
    fn test_negative_employee_count_is_rejected() {
        let result: Result<FacilityRecord, _> =
            serde_json::from_str(r#"{"facility_id": "FAC-1", "employee_count": -3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_valid_until_parsing() {
        assert_eq!(
            Accreditation::new("JCAHO", "A-1", "2024-06-30").valid_until_date(),
            NaiveDate::from_ymd_opt(2024, 6, 30)
        );
        assert!(Accreditation::new("JCAHO", "A-1", "06/30/2024").valid_until_date().is_none());
        assert!(Accreditation::new("JCAHO", "A-1", "2024-02-30").valid_until_date().is_none());
        assert!(Accreditation::new("JCAHO", "A-1", "").valid_until_date().is_none());
    }

    #[test]
    fn test_metrics() {
        let mut record = FacilityRecord::new("FAC-1", "North")
            .with_accreditation(Accreditation::new("JCAHO", "A-1", "2024-06-30"));
        record.employee_count = 120;
        record.services = ["er", "icu", "radiology"].iter().map(ToString::to_string).collect();

        let metrics = record.metrics();
        assert_eq!(metrics.total_services, 3);
        assert_eq!(metrics.total_accreditations, 1);
        assert_eq!(metrics.active_accreditations, 1);
        assert!((metrics.employees_per_service - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_without_services() {
        let mut record = FacilityRecord::new("FAC-1", "North");
        record.employee_count = 50;
        assert!(record.metrics().employees_per_service.abs() < f64::EPSILON);
    }

    #[test]
    fn test_city_state_fallback() {
        let location = Location {
            city: Some("Boise".to_string()),
            ..Location::default()
        };
        assert_eq!(location.city_state(), "Boise, N/A");
    }
}
