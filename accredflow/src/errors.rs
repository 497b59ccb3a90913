//! Error types for the accredflow pipeline.
//!
//! The taxonomy separates failures the pipeline absorbs (per-record parse
//! errors, per-notification publish errors) from failures that end an
//! execution (fatal query errors, exhausted retries, archive failures).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::PipelineState;

/// The main error type for accredflow operations.
#[derive(Debug, Error)]
pub enum AccredflowError {
    /// The analytical engine rejected or failed a stage.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// A single record could not be parsed.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// A single notification could not be published.
    #[error("{0}")]
    Publish(#[from] PublishError),

    /// Reading a stage output from storage failed.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Archiving the execution failed.
    #[error("{0}")]
    Archive(#[from] ArchiveError),

    /// The configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The execution was cancelled at a transition boundary.
    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    /// The state machine was asked to make an illegal move.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// The state the machine was in.
        from: PipelineState,
        /// The requested target state.
        to: PipelineState,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AccredflowError {
    /// Returns the taxonomy name used in reports and operational alerts.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.kind(),
            Self::Parse(_) => "ParseError",
            Self::Publish(_) => "PublishError",
            Self::Storage(_) => "StorageError",
            Self::Archive(_) => "ArchiveError",
            Self::Config(_) => "ConfigError",
            Self::Cancelled(_) => "Cancelled",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Failure reported by the analytical engine for one stage attempt.
///
/// The variant carries the retry classification: `Transient` failures
/// (throttling, timeouts) are retried, `Query` failures (syntax, permission)
/// are not.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    /// Throttling, timeout or another condition that may clear on retry.
    #[error("Transient engine error: {reason}")]
    Transient {
        /// What the engine reported.
        reason: String,
    },

    /// Malformed query, missing permission or another permanent failure.
    #[error("Query error: {reason}")]
    Query {
        /// What the engine reported.
        reason: String,
    },
}

impl EngineError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Creates a fatal query error.
    #[must_use]
    pub fn query(reason: impl Into<String>) -> Self {
        Self::Query {
            reason: reason.into(),
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the taxonomy name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "TransientEngineError",
            Self::Query { .. } => "QueryError",
        }
    }

    /// Returns the engine-reported reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason } | Self::Query { reason } => reason,
        }
    }
}

/// A malformed line in a newline-delimited record batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Parse error on line {line}: {reason}")]
pub struct ParseError {
    /// One-based line number within the batch.
    pub line: usize,
    /// Why the line was rejected.
    pub reason: String,
}

impl ParseError {
    /// Creates a new parse error.
    #[must_use]
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// A notification that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Publish to '{channel}' failed: {reason}")]
pub struct PublishError {
    /// The channel the notification was bound for.
    pub channel: String,
    /// The facility the notification concerned, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
    /// What the channel reported.
    pub reason: String,
}

impl PublishError {
    /// Creates a new publish error.
    #[must_use]
    pub fn new(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            facility_id: None,
            reason: reason.into(),
        }
    }

    /// Attaches the facility the notification concerned.
    #[must_use]
    pub fn with_facility(mut self, facility_id: impl Into<String>) -> Self {
        self.facility_id = Some(facility_id.into());
        self
    }
}

/// Errors raised by an object store.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StorageError {
    /// Nothing is stored under the key.
    #[error("Object not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The destination of a finalize already holds objects.
    #[error("Destination already exists: {prefix}")]
    AlreadyExists {
        /// The occupied prefix.
        prefix: String,
    },

    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                key: err.to_string(),
            }
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Errors raised while archiving an execution.
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    /// The underlying store failed.
    #[error("Archive storage failure: {0}")]
    Storage(#[from] StorageError),

    /// A staged artifact did not read back with the digest it was written with.
    #[error(
        "Archive artifact '{key}' failed digest verification (expected {expected}, found {actual})"
    )]
    DigestMismatch {
        /// The staged key.
        key: String,
        /// Digest computed at write time.
        expected: String,
        /// Digest computed on read-back.
        actual: String,
    },

    /// An artifact could not be serialized.
    #[error("Archive serialization failure: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_classification() {
        let transient = EngineError::transient("ThrottlingException");
        let fatal = EngineError::query("SYNTAX_ERROR: line 1:8");

        assert!(transient.is_retryable());
        assert!(!fatal.is_retryable());
        assert_eq!(transient.kind(), "TransientEngineError");
        assert_eq!(fatal.kind(), "QueryError");
        assert_eq!(fatal.reason(), "SYNTAX_ERROR: line 1:8");
    }

    #[test]
    fn test_engine_error_serialize_tagged() {
        let err = EngineError::query("denied");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "query", "reason": "denied"}));
    }

    #[test]
    fn test_accredflow_error_kind_passthrough() {
        let err: AccredflowError = EngineError::transient("timeout").into();
        assert_eq!(err.kind(), "TransientEngineError");

        let err: AccredflowError = ArchiveError::Serialization("bad".to_string()).into();
        assert_eq!(err.kind(), "ArchiveError");
    }

    #[test]
    fn test_error_to_dict() {
        let err = AccredflowError::Cancelled("operator request".to_string());
        let dict = err.to_dict();
        assert_eq!(dict.get("type").unwrap(), "Cancelled");
        assert_eq!(dict.get("message").unwrap(), "Execution cancelled: operator request");
    }

    #[test]
    fn test_publish_error_with_facility() {
        let err =
            PublishError::new("healthcare-accreditation-critical", "503").with_facility("FAC-1");
        assert_eq!(err.facility_id.as_deref(), Some("FAC-1"));
        assert!(err.to_string().contains("healthcare-accreditation-critical"));
    }

    #[test]
    fn test_storage_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(StorageError::from(io), StorageError::NotFound { .. }));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(StorageError::from(io), StorageError::Backend(_)));
    }
}
