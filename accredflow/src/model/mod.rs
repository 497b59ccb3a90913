//! Facility records and their classified form.

mod classified;
mod facility;

pub use classified::{AccreditationExpiry, ClassifiedFacility, Tier, TierCounts};
pub use facility::{
    Accreditation, FacilityMetrics, FacilityRecord, Lab, Location, VALID_UNTIL_FORMAT,
};
