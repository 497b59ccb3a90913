//! Facility record fixtures.

use chrono::{Duration, NaiveDate};

use crate::model::Tier;

/// The as-of date the fixtures are built around.
#[must_use]
pub fn fixture_as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap_or_default()
}

/// One NDJSON line for a facility whose accreditations expire at the given
/// day offsets from `as_of`.
#[must_use]
pub fn facility_json(facility_id: &str, as_of: NaiveDate, expiry_offsets: &[i64]) -> String {
    let accreditations: Vec<serde_json::Value> = expiry_offsets
        .iter()
        .enumerate()
        .map(|(i, days)| {
            serde_json::json!({
                "accreditation_body": if i % 2 == 0 { "JCAHO" } else { "CAP" },
                "accreditation_id": format!("{facility_id}-ACC-{i}"),
                "valid_until": (as_of + Duration::days(*days)).format("%Y-%m-%d").to_string(),
            })
        })
        .collect();

    serde_json::json!({
        "facility_id": facility_id,
        "facility_name": format!("Facility {facility_id}"),
        "location": {"address": "1 Main St", "city": "Springfield", "state": "IL", "zip": "62701"},
        "employee_count": 120,
        "services": ["Emergency", "Radiology"],
        "labs": [{"lab_name": "Core Lab", "certifications": ["CLIA"]}],
        "accreditations": accreditations,
    })
    .to_string()
}

/// Facilities in [`sample_batch`] with the tier each should receive.
pub const SAMPLE_TIERS: [(&str, Tier); 6] = [
    ("FAC-001", Tier::Critical),
    ("FAC-002", Tier::High),
    ("FAC-003", Tier::Medium),
    ("FAC-004", Tier::None),
    ("FAC-005", Tier::Critical),
    ("FAC-006", Tier::None),
];

/// A Stage 2 style batch covering every tier, an expired accreditation and
/// a facility with no accreditations.
#[must_use]
pub fn sample_batch(as_of: NaiveDate) -> String {
    [
        facility_json("FAC-001", as_of, &[10, 200]),
        facility_json("FAC-002", as_of, &[45]),
        facility_json("FAC-003", as_of, &[75, 120]),
        facility_json("FAC-004", as_of, &[150]),
        facility_json("FAC-005", as_of, &[-3]),
        facility_json("FAC-006", as_of, &[]),
    ]
    .join("\n")
}
