//! Expiry classification.
//!
//! Classification is a pure function of a record and an as-of date: the
//! soonest valid expiry across a facility's accreditations decides its tier.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AccredflowError;
use crate::model::{AccreditationExpiry, ClassifiedFacility, FacilityRecord, Tier};

/// Inclusive day limits for each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThresholds {
    /// At or below this many days: critical.
    #[serde(default = "default_critical")]
    pub critical_days: i64,
    /// At or below this many days: high.
    #[serde(default = "default_high")]
    pub high_days: i64,
    /// At or below this many days: medium. This is the notice window.
    #[serde(default = "default_medium")]
    pub medium_days: i64,
}

fn default_critical() -> i64 {
    30
}

fn default_high() -> i64 {
    60
}

fn default_medium() -> i64 {
    90
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            critical_days: default_critical(),
            high_days: default_high(),
            medium_days: default_medium(),
        }
    }
}

impl TierThresholds {
    /// Returns the tier for a day count; first match wins.
    #[must_use]
    pub fn tier_for(&self, days_until_expiry: i64) -> Tier {
        if days_until_expiry <= self.critical_days {
            Tier::Critical
        } else if days_until_expiry <= self.high_days {
            Tier::High
        } else if days_until_expiry <= self.medium_days {
            Tier::Medium
        } else {
            Tier::None
        }
    }

    /// Checks the limits are non-negative and strictly increasing.
    pub fn validate(&self) -> Result<(), AccredflowError> {
        if self.critical_days < 0
            || self.critical_days >= self.high_days
            || self.high_days >= self.medium_days
        {
            return Err(AccredflowError::Config(format!(
                "tier thresholds must satisfy 0 <= critical < high < medium, got {}/{}/{}",
                self.critical_days, self.high_days, self.medium_days
            )));
        }
        Ok(())
    }
}

/// Assigns urgency tiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryClassifier {
    thresholds: TierThresholds,
}

impl ExpiryClassifier {
    /// Creates a classifier with the given thresholds.
    #[must_use]
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    /// Returns the thresholds in use.
    #[must_use]
    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// Classifies one record as of `as_of_date`.
    ///
    /// Accreditations whose `valid_until` does not parse are excluded and
    /// counted. A record with no valid date is `Tier::None`.
    pub fn classify(&self, record: FacilityRecord, as_of_date: NaiveDate) -> ClassifiedFacility {
        let mut accreditations = Vec::with_capacity(record.accreditations.len());
        let mut invalid_dates = 0;

        for accreditation in &record.accreditations {
            let Some(valid_until) = accreditation.valid_until_date() else {
                warn!(
                    facility_id = %record.facility_id,
                    accreditation_id = %accreditation.accreditation_id,
                    valid_until = %accreditation.valid_until,
                    "Excluding accreditation with unparsable expiry date"
                );
                invalid_dates += 1;
                continue;
            };

            let days = (valid_until - as_of_date).num_days();
            accreditations.push(AccreditationExpiry {
                accreditation_body: accreditation.accreditation_body.clone(),
                accreditation_id: accreditation.accreditation_id.clone(),
                valid_until,
                days_until_expiry: days,
                tier: self.thresholds.tier_for(days),
            });
        }

        let days_until_expiry = accreditations.iter().map(|a| a.days_until_expiry).min();
        let tier = days_until_expiry.map_or(Tier::None, |days| self.thresholds.tier_for(days));

        ClassifiedFacility {
            facility: record,
            days_until_expiry,
            tier,
            accreditations,
            invalid_dates,
        }
    }

    /// Classifies a batch, preserving order.
    pub fn classify_all(
        &self,
        records: Vec<FacilityRecord>,
        as_of_date: NaiveDate,
    ) -> Vec<ClassifiedFacility> {
        records
            .into_iter()
            .map(|record| self.classify(record, as_of_date))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Accreditation;
    use chrono::Duration;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn expiring_in(days: &[i64]) -> FacilityRecord {
        days.iter().enumerate().fold(FacilityRecord::new("FAC-1", "North"), |record, (i, d)| {
            let date = as_of() + Duration::days(*d);
            record.with_accreditation(Accreditation::new(
                "JCAHO",
                format!("A-{i}"),
                date.format("%Y-%m-%d").to_string(),
            ))
        })
    }

    fn tier_of(days: i64) -> Tier {
        ExpiryClassifier::default().classify(expiring_in(&[days]), as_of()).tier
    }

    #[test]
    fn test_soonest_expiry_drives_tier() {
        let classified = ExpiryClassifier::default().classify(expiring_in(&[200, 10]), as_of());

        assert_eq!(classified.tier, Tier::Critical);
        assert_eq!(classified.days_until_expiry, Some(10));
        assert_eq!(classified.accreditations.len(), 2);
        assert_eq!(classified.accreditations_in_tier().count(), 1);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        assert_eq!(tier_of(30), Tier::Critical);
        assert_eq!(tier_of(31), Tier::High);
        assert_eq!(tier_of(60), Tier::High);
        assert_eq!(tier_of(61), Tier::Medium);
        assert_eq!(tier_of(90), Tier::Medium);
        assert_eq!(tier_of(91), Tier::None);
    }

    #[test]
    fn test_expired_is_critical() {
        let classified = ExpiryClassifier::default().classify(expiring_in(&[-15]), as_of());
        assert_eq!(classified.tier, Tier::Critical);
        assert_eq!(classified.days_until_expiry, Some(-15));
    }

    #[test]
    fn test_no_accreditations_is_none() {
        let classified =
            ExpiryClassifier::default().classify(FacilityRecord::new("FAC-1", "North"), as_of());
        assert_eq!(classified.tier, Tier::None);
        assert_eq!(classified.days_until_expiry, None);
    }

    #[test]
    fn test_unparsable_dates_are_excluded_not_fatal() {
        let record = expiring_in(&[120])
            .with_accreditation(Accreditation::new("CAP", "bad-1", "soon"))
            .with_accreditation(Accreditation::new("CAP", "bad-2", ""));
        let classified = ExpiryClassifier::default().classify(record, as_of());

        assert_eq!(classified.invalid_dates, 2);
        assert_eq!(classified.tier, Tier::None);
        assert_eq!(classified.days_until_expiry, Some(120));
    }

    #[test]
    fn test_only_unparsable_dates_is_none() {
        let record = FacilityRecord::new("FAC-1", "North")
            .with_accreditation(Accreditation::new("CAP", "bad", "2024-13-01"));
        let classified = ExpiryClassifier::default().classify(record, as_of());

        assert_eq!(classified.tier, Tier::None);
        assert_eq!(classified.invalid_dates, 1);
    }

    #[test]
    fn test_tier_is_monotonic_in_days() {
        let classifier = ExpiryClassifier::default();
        let tiers: Vec<Tier> = (-400..=400)
            .map(|d| classifier.classify(expiring_in(&[d]), as_of()).tier)
            .collect();

        for pair in tiers.windows(2) {
            assert!(pair[0] >= pair[1], "urgency increased with more days left");
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        let classifier = ExpiryClassifier::default();
        let record = expiring_in(&[45, 75, -2]);
        assert_eq!(
            classifier.classify(record.clone(), as_of()),
            classifier.classify(record, as_of())
        );
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier = ExpiryClassifier::new(TierThresholds {
            critical_days: 7,
            high_days: 14,
            medium_days: 28,
        });
        assert_eq!(classifier.classify(expiring_in(&[10]), as_of()).tier, Tier::High);
        assert_eq!(classifier.classify(expiring_in(&[29]), as_of()).tier, Tier::None);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(TierThresholds::default().validate().is_ok());
        let bad = TierThresholds {
            critical_days: 60,
            high_days: 30,
            medium_days: 90,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_classify_all_preserves_order() {
        let records = vec![
            FacilityRecord::new("B", "b"),
            expiring_in(&[5]),
            FacilityRecord::new("A", "a"),
        ];
        let classified = ExpiryClassifier::default().classify_all(records, as_of());
        let ids: Vec<&str> = classified.iter().map(ClassifiedFacility::facility_id).collect();
        assert_eq!(ids, vec!["B", "FAC-1", "A"]);
    }
}
