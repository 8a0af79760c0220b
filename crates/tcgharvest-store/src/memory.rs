//! In-memory blob store for tests and ephemeral runs

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::blob::{BlobError, BlobKeys, BlobStore};

/// Blob store backed by a sorted map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("memory store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a key, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.blobs
            .write()
            .expect("memory store lock poisoned")
            .remove(key)
            .is_some()
    }
}

impl BlobStore for MemoryStore {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey {
                key: key.to_string(),
            });
        }
        self.blobs
            .write()
            .expect("memory store lock poisoned")
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .expect("memory store lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })
    }

    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self
            .blobs
            .read()
            .expect("memory store lock poisoned")
            .contains_key(key))
    }

    fn list(&self, prefix: &str) -> BlobKeys<'_> {
        // Snapshot so callers may write while iterating
        let keys: Vec<String> = self
            .blobs
            .read()
            .expect("memory store lock poisoned")
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Box::new(keys.into_iter().map(Ok))
    }
}
