//! In-memory object storage, used when no durable backend is configured and in tests.

use crate::keys::validate_key;
use crate::traits::{ObjectStorage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .ok()
            .and_then(|o| o.get(key).map(|obj| obj.content_type.clone()))
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<String> {
        validate_key(key)?;
        let size = data.len();
        self.objects
            .write()
            .map_err(|_| StorageError::UploadFailed("storage lock poisoned".to_string()))?
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    content_type: content_type.to_string(),
                },
            );

        tracing::debug!(key = %key, size_bytes = size, "Memory storage put");
        Ok(format!("memory://{key}"))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        self.objects
            .read()
            .map_err(|_| StorageError::DownloadFailed("storage lock poisoned".to_string()))?
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_and_overwrite() {
        let storage = MemoryStorage::new();
        let key = "submissions/u/id/00-a.txt";

        let url = storage
            .put(key, Bytes::from_static(b"one"), "text/plain")
            .await
            .unwrap();
        assert_eq!(url, "memory://submissions/u/id/00-a.txt");

        storage
            .put(key, Bytes::from_static(b"two"), "text/markdown")
            .await
            .unwrap();

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(key).await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(storage.content_type(key).as_deref(), Some("text/markdown"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.get("submissions/x").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(storage.is_empty());
    }
}
