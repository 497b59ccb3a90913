//! Atomic archival of a finished execution.
//!
//! Artifacts are written under a per-execution staging prefix, read back and
//! checked against the digest computed at write time, then published to the
//! archive prefix with a single `finalize`. The manifest is staged last, so a
//! published archive always carries one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{content_md5, ObjectStore};
use crate::errors::ArchiveError;

/// Name of the manifest object inside an archive.
pub const MANIFEST_NAME: &str = "manifest.json";

/// One object in an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedArtifact {
    /// Path relative to the archive location.
    pub name: String,
    /// Base64 MD5 of the content.
    pub content_md5: String,
    /// Content length.
    pub size_bytes: u64,
    /// Where the content was copied from, for stage outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Index of an archive, stored alongside its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// The archived execution.
    pub execution_id: String,
    /// Final archive location.
    pub location: String,
    /// When staging finished.
    pub archived_at: DateTime<Utc>,
    /// Every artifact except the manifest itself.
    pub artifacts: Vec<ArchivedArtifact>,
}

impl ArchiveManifest {
    /// Looks up an artifact by name.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&ArchivedArtifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

/// What to archive for one execution.
#[derive(Debug, Clone, Default)]
pub struct ArchiveRequest {
    /// The execution.
    pub execution_id: String,
    /// `(stage_name, output_location)` for every stage output to copy.
    pub stage_outputs: Vec<(String, String)>,
    /// JSON documents to store as `<name>.json`.
    pub documents: Vec<(String, serde_json::Value)>,
}

impl ArchiveRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            ..Self::default()
        }
    }

    /// Adds a stage output.
    #[must_use]
    pub fn with_stage_output(
        mut self,
        stage_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        self.stage_outputs.push((stage_name.into(), location.into()));
        self
    }

    /// Adds a JSON document.
    #[must_use]
    pub fn with_document(mut self, name: impl Into<String>, document: serde_json::Value) -> Self {
        self.documents.push((name.into(), document));
        self
    }
}

/// Stages, verifies and publishes execution archives.
#[derive(Clone)]
pub struct Archiver {
    store: Arc<dyn ObjectStore>,
    staging_prefix: String,
    archive_prefix: String,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("staging_prefix", &self.staging_prefix)
            .field("archive_prefix", &self.archive_prefix)
            .finish_non_exhaustive()
    }
}

fn join_prefix(prefix: &str, execution_id: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{execution_id}/")
    } else {
        format!("{prefix}/{execution_id}/")
    }
}

impl Archiver {
    /// Creates an archiver over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        staging_prefix: impl Into<String>,
        archive_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            staging_prefix: staging_prefix.into(),
            archive_prefix: archive_prefix.into(),
        }
    }

    /// Final archive location for an execution.
    #[must_use]
    pub fn location_for(&self, execution_id: &str) -> String {
        join_prefix(&self.archive_prefix, execution_id)
    }

    fn staging_for(&self, execution_id: &str) -> String {
        join_prefix(&self.staging_prefix, execution_id)
    }

    /// Archives an execution.
    ///
    /// On failure the staging prefix is cleaned up and nothing is visible
    /// under the final location.
    pub async fn archive(&self, request: &ArchiveRequest) -> Result<ArchiveManifest, ArchiveError> {
        let staging = self.staging_for(&request.execution_id);
        let location = self.location_for(&request.execution_id);

        // Leftovers from an interrupted attempt would end up in the archive.
        self.store.delete_prefix(&staging).await?;

        match self.stage_and_publish(request, &staging, &location).await {
            Ok(manifest) => {
                info!(
                    execution_id = %request.execution_id,
                    location = %manifest.location,
                    artifacts = manifest.artifacts.len(),
                    "Execution archived"
                );
                Ok(manifest)
            }
            Err(err) => {
                warn!(
                    execution_id = %request.execution_id,
                    error = %err,
                    "Archive failed, discarding staged artifacts"
                );
                if let Err(cleanup) = self.store.delete_prefix(&staging).await {
                    warn!(
                        execution_id = %request.execution_id,
                        error = %cleanup,
                        "Failed to discard staged artifacts"
                    );
                }
                Err(err)
            }
        }
    }

    async fn stage(
        &self,
        staging: &str,
        name: String,
        bytes: Vec<u8>,
        source: Option<String>,
    ) -> Result<ArchivedArtifact, ArchiveError> {
        let artifact = ArchivedArtifact {
            content_md5: content_md5(&bytes),
            size_bytes: bytes.len() as u64,
            name,
            source,
        };
        self.store.put(&format!("{staging}{}", artifact.name), bytes).await?;
        debug!(artifact = %artifact.name, size_bytes = artifact.size_bytes, "Artifact staged");
        Ok(artifact)
    }

    async fn stage_and_publish(
        &self,
        request: &ArchiveRequest,
        staging: &str,
        location: &str,
    ) -> Result<ArchiveManifest, ArchiveError> {
        let mut artifacts = Vec::new();

        for (stage_name, output_location) in &request.stage_outputs {
            let bytes = self.store.get(output_location).await?;
            let file_name = output_location
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .unwrap_or("output");
            let name = format!("{stage_name}/{file_name}");
            artifacts.push(
                self.stage(staging, name, bytes, Some(output_location.clone()))
                    .await?,
            );
        }

        for (name, document) in &request.documents {
            let bytes = serde_json::to_vec_pretty(document)
                .map_err(|e| ArchiveError::Serialization(e.to_string()))?;
            artifacts.push(self.stage(staging, format!("{name}.json"), bytes, None).await?);
        }

        for artifact in &artifacts {
            let key = format!("{staging}{}", artifact.name);
            let actual = content_md5(&self.store.get(&key).await?);
            if actual != artifact.content_md5 {
                return Err(ArchiveError::DigestMismatch {
                    key,
                    expected: artifact.content_md5.clone(),
                    actual,
                });
            }
        }

        let manifest = ArchiveManifest {
            execution_id: request.execution_id.clone(),
            location: location.to_string(),
            archived_at: Utc::now(),
            artifacts,
        };
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        self.store
            .put(&format!("{staging}{MANIFEST_NAME}"), bytes)
            .await?;

        self.store.finalize(staging, location).await?;
        Ok(manifest)
    }

    /// Reads the manifest of a published archive.
    pub async fn read_manifest(&self, execution_id: &str) -> Result<ArchiveManifest, ArchiveError> {
        let key = format!("{}{MANIFEST_NAME}", self.location_for(execution_id));
        let bytes = self.store.get(&key).await?;
        serde_json::from_slice(&bytes).map_err(|e| ArchiveError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;
    use crate::storage::InMemoryObjectStore;
    use crate::testing::FaultyStore;
    use pretty_assertions::assert_eq;

    fn request() -> ArchiveRequest {
        ArchiveRequest::new("exec-1")
            .with_stage_output("stage1", "results/exec-1/stage1/q1.jsonl")
            .with_stage_output("stage2", "results/exec-1/stage2/q2.jsonl")
            .with_document("report", serde_json::json!({"dispatched": 2}))
    }

    fn seeded() -> Arc<InMemoryObjectStore> {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("results/exec-1/stage1/q1.jsonl", "{\"facility_id\":\"A\"}\n");
        store.insert("results/exec-1/stage2/q2.jsonl", "");
        store
    }

    #[tokio::test]
    async fn test_archive_publishes_everything_with_manifest() {
        let store = seeded();
        let archiver = Archiver::new(store.clone(), "staging", "archive/");

        let manifest = archiver.archive(&request()).await.unwrap();

        assert_eq!(manifest.location, "archive/exec-1/");
        assert_eq!(manifest.artifacts.len(), 3);
        assert!(store.contains("archive/exec-1/stage1/q1.jsonl"));
        assert!(store.contains("archive/exec-1/report.json"));
        assert!(store.contains("archive/exec-1/manifest.json"));
        assert!(store.keys().iter().all(|k| !k.starts_with("staging/")));

        let stage1 = manifest.artifact("stage1/q1.jsonl").unwrap();
        assert_eq!(stage1.content_md5, content_md5(b"{\"facility_id\":\"A\"}\n"));
        assert_eq!(archiver.read_manifest("exec-1").await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn test_missing_stage_output_leaves_nothing_behind() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("results/exec-1/stage1/q1.jsonl", "x");
        let archiver = Archiver::new(store.clone(), "staging", "archive");

        let err = archiver.archive(&request()).await.unwrap_err();

        assert!(matches!(err, ArchiveError::Storage(StorageError::NotFound { .. })));
        assert_eq!(store.keys(), vec!["results/exec-1/stage1/q1.jsonl"]);
    }

    #[tokio::test]
    async fn test_finalize_failure_is_not_visible() {
        let inner = seeded();
        let store = Arc::new(FaultyStore::new(inner.clone()).fail_finalize());
        let archiver = Archiver::new(store, "staging", "archive");

        assert!(archiver.archive(&request()).await.is_err());
        assert!(inner.keys().iter().all(|k| !k.starts_with("archive/")));
        assert!(inner.keys().iter().all(|k| !k.starts_with("staging/")));
    }

    #[tokio::test]
    async fn test_corrupted_read_back_is_rejected() {
        let inner = seeded();
        let store = Arc::new(FaultyStore::new(inner.clone()).corrupt_reads_under("staging/"));
        let archiver = Archiver::new(store, "staging", "archive");

        let err = archiver.archive(&request()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::DigestMismatch { .. }));
        assert!(inner.keys().iter().all(|k| !k.starts_with("archive/")));
    }

    #[tokio::test]
    async fn test_second_archive_of_same_execution_is_refused() {
        let store = seeded();
        let archiver = Archiver::new(store, "staging", "archive");

        archiver.archive(&request()).await.unwrap();
        let err = archiver.archive(&request()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Storage(StorageError::AlreadyExists { .. })));
    }
}
