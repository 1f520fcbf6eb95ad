//! Durable key-value storage used by the offline queue
//!
//! The queue only needs opaque bytes under a well-known key. [`FileStore`]
//! is the production implementation (one file per key, atomic replace);
//! [`MemoryStore`] backs tests and ephemeral configurations.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage failures surfaced by key-value stores
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("storage i/o failure: {0}")]
    Io(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

/// Durable bytes under a well-known key
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// File-backed store: one file per key inside a dedicated directory.
///
/// Writes go to a temp file first and are atomically renamed over the
/// final path, so readers never observe a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!("{key}.tmp"));

        let mut file =
            tokio::fs::File::create(&tmp).await.map_err(|e| StoreError::Io(e.to_string()))?;
        file.write_all(&value).await.map_err(|e| StoreError::Io(e.to_string()))?;
        file.sync_all().await.map_err(|e| StoreError::Io(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(|e| StoreError::Io(e.to_string()))?;
        debug!(key, bytes = value.len(), "persisted value");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}

/// In-memory store for tests and ephemeral setups
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        store.put("queue.v1", b"payload".to_vec()).await.expect("put");
        let loaded = store.get("queue.v1").await.expect("get");
        assert_eq!(loaded.as_deref(), Some(b"payload".as_slice()));
    }

    #[tokio::test]
    async fn test_file_store_missing_key_is_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        assert!(store.get("absent").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_file_store_overwrite_replaces_value() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        store.put("k", b"first".to_vec()).await.expect("put");
        store.put("k", b"second".to_vec()).await.expect("put");

        let loaded = store.get("k").await.expect("get");
        assert_eq!(loaded.as_deref(), Some(b"second".as_slice()));
    }

    #[tokio::test]
    async fn test_file_store_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        store.put("k", b"v".to_vec()).await.expect("put");
        store.remove("k").await.expect("remove");
        store.remove("k").await.expect("second remove");
        assert!(store.get("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_traversal_keys() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        let result = store.put("../escape", b"v".to_vec()).await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.put("k", b"v".to_vec()).await.expect("put");
        assert_eq!(store.get("k").await.expect("get").as_deref(), Some(b"v".as_slice()));
        store.remove("k").await.expect("remove");
        assert!(store.get("k").await.expect("get").is_none());
    }
}
