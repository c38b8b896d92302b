//! In-memory storage backend.
//!
//! Everything lives in a `BTreeMap` behind a `RwLock` and is gone when the
//! process exits. Clones share the same map, so two handles behave like two
//! browser tabs looking at the same origin storage.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// # Examples
///
/// ```
/// # use musiflow_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("offerClaimed", b"true").await.unwrap();
/// let val = backend.get("offerClaimed").await.unwrap();
/// assert_eq!(val, Some(b"true".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let keys = data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("codes").await.unwrap(), None);
        assert!(!backend.exists("codes").await.unwrap());
    }

    #[tokio::test]
    async fn put_overwrites_previous_document() {
        let backend = MemoryBackend::new();
        backend.put("stock", b"[]").await.unwrap();
        backend.put("stock", br#"[{"email":"a@x.com"}]"#).await.unwrap();
        let val = backend.get("stock").await.unwrap().unwrap();
        assert!(val.starts_with(b"[{"));
        assert_eq!(backend.list("").await.unwrap(), vec!["stock"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("offerClaimed", b"true").await.unwrap();
        backend.delete("offerClaimed").await.unwrap();
        backend.delete("offerClaimed").await.unwrap();
        assert!(!backend.exists("offerClaimed").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let backend = MemoryBackend::new();
        backend.put("codes", b"[]").await.unwrap();
        backend.put("credentials", b"[]").await.unwrap();
        backend.put("stock", b"[]").await.unwrap();

        let keys = backend.list("c").await.unwrap();
        assert_eq!(keys, vec!["codes", "credentials"]);
        assert_eq!(backend.list("").await.unwrap().len(), 3);
        assert!(backend.list("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let tab_a = MemoryBackend::new();
        let tab_b = tab_a.clone();
        tab_a.put("codes", b"[]").await.unwrap();
        assert_eq!(tab_b.get("codes").await.unwrap(), Some(b"[]".to_vec()));
    }
}
