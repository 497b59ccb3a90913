//! Urgency tiers and classified facilities.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{FacilityMetrics, FacilityRecord};

/// Urgency of a facility's soonest-expiring accreditation.
///
/// Variants are declared from least to most urgent so the derived ordering
/// compares urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Outside the notice window, or nothing to measure.
    None,
    /// Expiring within the medium window.
    Medium,
    /// Expiring within the high window.
    High,
    /// Expiring within the critical window, or already expired.
    Critical,
}

impl Tier {
    /// Tiers that are published, most urgent first.
    pub const DISPATCHABLE: [Self; 3] = [Self::Critical, Self::High, Self::Medium];

    /// Returns true if facilities in this tier are notified.
    #[must_use]
    pub fn is_dispatchable(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Title-case label used in notification text.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::None => "None",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::None => "NONE",
        };
        f.write_str(name)
    }
}

/// Expiry detail for one accreditation with a parseable date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccreditationExpiry {
    /// Issuing body.
    pub accreditation_body: String,
    /// Identifier assigned by the body.
    pub accreditation_id: String,
    /// Parsed expiry date.
    pub valid_until: NaiveDate,
    /// Signed days from the as-of date; negative when already expired.
    pub days_until_expiry: i64,
    /// Tier this accreditation alone would receive.
    pub tier: Tier,
}

/// A facility with its urgency tier for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedFacility {
    /// The extracted record.
    pub facility: FacilityRecord,
    /// Minimum days until expiry across valid accreditations.
    pub days_until_expiry: Option<i64>,
    /// The facility's tier, driven by the soonest expiry.
    pub tier: Tier,
    /// Per-accreditation detail for accreditations with valid dates.
    pub accreditations: Vec<AccreditationExpiry>,
    /// Accreditations excluded because their date did not parse.
    pub invalid_dates: usize,
}

impl ClassifiedFacility {
    /// Shortcut to the facility identifier.
    #[must_use]
    pub fn facility_id(&self) -> &str {
        &self.facility.facility_id
    }

    /// Accreditations that fall in the facility's own tier.
    pub fn accreditations_in_tier(&self) -> impl Iterator<Item = &AccreditationExpiry> {
        self.accreditations.iter().filter(move |a| a.tier == self.tier)
    }

    /// Derived facility metrics.
    #[must_use]
    pub fn metrics(&self) -> FacilityMetrics {
        self.facility.metrics()
    }
}

/// Facility counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    /// Critical facilities.
    pub critical: usize,
    /// High facilities.
    pub high: usize,
    /// Medium facilities.
    pub medium: usize,
    /// Facilities outside the notice window.
    pub none: usize,
}

impl TierCounts {
    /// Adds one facility to `tier`.
    pub fn increment(&mut self, tier: Tier) {
        *self.slot(tier) += 1;
    }

    /// Returns the count for `tier`.
    #[must_use]
    pub fn get(&self, tier: Tier) -> usize {
        match tier {
            Tier::Critical => self.critical,
            Tier::High => self.high,
            Tier::Medium => self.medium,
            Tier::None => self.none,
        }
    }

    /// Sum of the dispatchable tiers.
    #[must_use]
    pub fn dispatchable(&self) -> usize {
        self.critical + self.high + self.medium
    }

    /// Sum across every tier.
    #[must_use]
    pub fn total(&self) -> usize {
        self.dispatchable() + self.none
    }

    fn slot(&mut self, tier: Tier) -> &mut usize {
        match tier {
            Tier::Critical => &mut self.critical,
            Tier::High => &mut self.high,
            Tier::Medium => &mut self.medium,
            Tier::None => &mut self.none,
        }
    }
}

impl<'a> FromIterator<&'a ClassifiedFacility> for TierCounts {
    fn from_iter<I: IntoIterator<Item = &'a ClassifiedFacility>>(iter: I) -> Self {
        let mut counts = Self::default();
        for facility in iter {
            counts.increment(facility.tier);
        }
        counts
    }
}
