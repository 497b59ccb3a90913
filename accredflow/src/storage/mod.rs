//! Durable object storage seam and execution archival.
//!
//! Keys are `/`-separated paths. A prefix names every key that starts with
//! it; callers pass prefixes ending in `/`.

mod archive;
mod fs;
mod memory;

pub use archive::{ArchiveManifest, ArchiveRequest, ArchivedArtifact, Archiver, MANIFEST_NAME};
pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};

use crate::errors::StorageError;

/// An object store with staged writes and atomic publication.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads the object stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Writes an object, replacing any previous value.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Lists keys under `prefix` in lexical order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Moves everything under `staging_prefix` to `final_prefix` in one step.
    ///
    /// Readers never observe a partially populated `final_prefix`. Fails with
    /// [`StorageError::AlreadyExists`] if `final_prefix` already holds objects.
    async fn finalize(&self, staging_prefix: &str, final_prefix: &str) -> Result<(), StorageError>;

    /// Removes every object under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;
}

/// Base64-encoded MD5 of `bytes`, in the `Content-MD5` header format.
#[must_use]
pub fn content_md5(bytes: &[u8]) -> String {
    STANDARD.encode(Md5::digest(bytes))
}
