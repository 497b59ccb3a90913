//! Filesystem-backed object store.

use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::ObjectStore;
use crate::errors::StorageError;

/// An object store rooted at a local directory.
///
/// Objects are written through a temporary file and renamed into place.
/// Prefixes map to directories, so `finalize` is a single directory rename.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Backend(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    async fn walk(&self, dir: PathBuf) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if !is_temp_file(&path) {
                    if let Some(key) = self.key_for(&path) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(".tmp"))
}

fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |err| {
        if err.kind() == ErrorKind::NotFound {
            StorageError::NotFound {
                key: key.to_string(),
            }
        } else {
            StorageError::Backend(err.to_string())
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(not_found(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::Backend(format!("invalid object key: {key}")))?;
        tokio::fs::create_dir_all(parent).await?;

        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("object");
        let tmp = parent.join(format!(
            ".{}.{}.{}.tmp",
            filename,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let start = match prefix.rfind('/') {
            Some(idx) => self.path_for(&prefix[..idx])?,
            None => self.root.clone(),
        };
        let mut keys: Vec<String> = self
            .walk(start)
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix.trim_start_matches('/')))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn finalize(&self, staging_prefix: &str, final_prefix: &str) -> Result<(), StorageError> {
        let staging = self.path_for(staging_prefix.trim_end_matches('/'))?;
        let destination = self.path_for(final_prefix.trim_end_matches('/'))?;

        if tokio::fs::try_exists(&destination).await? {
            return Err(StorageError::AlreadyExists {
                prefix: final_prefix.to_string(),
            });
        }
        if !tokio::fs::try_exists(&staging).await? {
            return Err(StorageError::NotFound {
                key: staging_prefix.to_string(),
            });
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&staging, &destination).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        if prefix.ends_with('/') {
            let dir = self.path_for(prefix.trim_end_matches('/'))?;
            return match tokio::fs::remove_dir_all(&dir).await {
                Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
                _ => Ok(()),
            };
        }
        for key in self.list(prefix).await? {
            tokio::fs::remove_file(self.path_for(&key)?).await?;
        }
        Ok(())
    }
}
