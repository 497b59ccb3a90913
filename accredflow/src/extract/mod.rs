//! Extraction of facility records from newline-delimited stage output.
//!
//! A malformed line never aborts the batch: it is skipped, counted and
//! reported with its line number.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::errors::ParseError;
use crate::model::FacilityRecord;

/// The outcome of extracting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Records in input order.
    pub records: Vec<FacilityRecord>,
    /// Number of lines skipped.
    pub skipped: usize,
    /// One entry per skipped line.
    pub errors: Vec<ParseError>,
}

impl ExtractionReport {
    /// Number of records extracted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parses newline-delimited JSON facility records.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordExtractor;

impl RecordExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Extracts every well-formed record from `input`.
    ///
    /// Blank lines are ignored. A line that is not valid JSON, lacks a
    /// `facility_id`, carries an empty one, or repeats an earlier one is
    /// skipped.
    pub fn extract(&self, input: &str) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (index, line) in input.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let parsed = serde_json::from_str::<FacilityRecord>(trimmed)
                .map_err(|e| e.to_string())
                .and_then(|record| {
                    if record.facility_id.trim().is_empty() {
                        Err("empty facility_id".to_string())
                    } else if seen.contains(&record.facility_id) {
                        Err(format!("duplicate facility_id '{}'", record.facility_id))
                    } else {
                        Ok(record)
                    }
                });

            match parsed {
                Ok(record) => {
                    seen.insert(record.facility_id.clone());
                    report.records.push(record);
                }
                Err(reason) => {
                    warn!(line = line_no, reason = %reason, "Skipping malformed facility record");
                    report.skipped += 1;
                    report.errors.push(ParseError::new(line_no, reason));
                }
            }
        }

        debug!(
            extracted = report.records.len(),
            skipped = report.skipped,
            "Facility batch extracted"
        );
        report
    }

    /// Serializes records back to newline-delimited JSON.
    pub fn to_ndjson(records: &[FacilityRecord]) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
