//! In-memory session storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use notifier_core::{SessionStore, StorageError};

/// In-memory storage implementation.
///
/// Useful for dry runs and tests.
/// Data is lost on restart.
pub struct MemorySessionStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemorySessionStore {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Create a storage pre-seeded with one session.
    #[must_use]
    pub fn with_session(session_id: impl Into<String>, blob: impl Into<Bytes>) -> Self {
        let store = Self::new();
        if let Ok(mut blobs) = store.blobs.write() {
            blobs.insert(session_id.into(), blob.into());
        }
        store
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .blobs
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .contains_key(session_id))
    }

    async fn save(&self, session_id: &str, blob: Bytes) -> Result<(), StorageError> {
        self.blobs
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(session_id.to_string(), blob);
        Ok(())
    }

    async fn extract(&self, session_id: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self
            .blobs
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(session_id)
            .cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        self.blobs
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_extract_is_identical() {
        let store = MemorySessionStore::new();
        let blob = Bytes::from_static(b"PK\x03\x04session-bytes\x00\xff");

        store.save("bot", blob.clone()).await.unwrap();

        assert!(store.exists("bot").await.unwrap());
        assert_eq!(store.extract("bot").await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn test_second_save_overwrites() {
        let store = MemorySessionStore::new();
        store.save("bot", Bytes::from_static(b"first")).await.unwrap();
        store.save("bot", Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(
            store.extract("bot").await.unwrap(),
            Some(Bytes::from_static(b"second"))
        );
    }

    #[tokio::test]
    async fn test_delete_reflects_absence() {
        let store = MemorySessionStore::with_session("bot", Bytes::from_static(b"blob"));
        store.delete("bot").await.unwrap();

        assert!(!store.exists("bot").await.unwrap());
        assert_eq!(store.extract("bot").await.unwrap(), None);

        // deleting again is not an error
        tokio_test::assert_ok!(store.delete("bot").await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = MemorySessionStore::new();
        store.save("a", Bytes::from_static(b"a")).await.unwrap();

        assert!(!store.exists("b").await.unwrap());
        assert_eq!(store.extract("b").await.unwrap(), None);
    }
}
