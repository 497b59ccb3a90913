//! In-memory object store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::ObjectStore;
use crate::errors::StorageError;

/// An object store held in a sorted map.
///
/// `finalize` moves keys under a single write lock, so readers see either
/// none or all of the published objects.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes an object synchronously; handy for seeding stage outputs.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.write().insert(key.into(), bytes.into());
    }

    /// Returns true if an object is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Returns every stored key.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}

fn keys_under(objects: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Vec<String> {
    objects
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key.clone())
        .collect()
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.objects.write().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(keys_under(&self.objects.read(), prefix))
    }

    async fn finalize(&self, staging_prefix: &str, final_prefix: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write();
        if !keys_under(&objects, final_prefix).is_empty() {
            return Err(StorageError::AlreadyExists {
                prefix: final_prefix.to_string(),
            });
        }
        let staged = keys_under(&objects, staging_prefix);
        if staged.is_empty() {
            return Err(StorageError::NotFound {
                key: staging_prefix.to_string(),
            });
        }
        for key in staged {
            if let Some(bytes) = objects.remove(&key) {
                let relative = &key[staging_prefix.len()..];
                objects.insert(format!("{final_prefix}{relative}"), bytes);
            }
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        self.objects.write().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_put_get_list() {
        let store = InMemoryObjectStore::new();
        assert_ok!(store.put("a/1", b"one".to_vec()).await);
        assert_ok!(store.put("a/2", b"two".to_vec()).await);
        assert_ok!(store.put("ab/3", b"three".to_vec()).await);

        assert_eq!(store.get("a/1").await.unwrap(), b"one");
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1", "a/2"]);
        assert!(matches!(
            store.get("missing").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_finalize_moves_every_staged_key() {
        let store = InMemoryObjectStore::new();
        store.insert("staging/e1/report.json", "{}");
        store.insert("staging/e1/stage1/out.jsonl", "x");

        assert_ok!(store.finalize("staging/e1/", "archive/e1/").await);

        assert_eq!(
            store.keys(),
            vec!["archive/e1/report.json", "archive/e1/stage1/out.jsonl"]
        );
    }

    #[tokio::test]
    async fn test_finalize_refuses_occupied_destination() {
        let store = InMemoryObjectStore::new();
        store.insert("staging/e1/report.json", "{}");
        store.insert("archive/e1/report.json", "old");

        let err = assert_err!(store.finalize("staging/e1/", "archive/e1/").await);
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert!(store.contains("staging/e1/report.json"));
        assert_eq!(store.get("archive/e1/report.json").await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = InMemoryObjectStore::new();
        store.insert("staging/e1/a", "1");
        store.insert("staging/e2/a", "2");

        assert_ok!(store.delete_prefix("staging/e1/").await);
        assert_eq!(store.keys(), vec!["staging/e2/a"]);
    }
}
