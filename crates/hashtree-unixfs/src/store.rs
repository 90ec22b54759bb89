//! Content-addressed node store seam and an in-memory implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::Hash;

/// Content-addressed key-value store interface
///
/// Writes are idempotent: putting the same hash twice is harmless, which is
/// what lets callers retry a failed import.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store data by its hash
    /// Returns true if newly stored, false if already existed
    async fn put(&self, hash: Hash, data: Vec<u8>) -> Result<bool, StoreError>;

    /// Retrieve data by hash
    /// Returns data or None if not found
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError>;

    /// Check if hash exists
    async fn has(&self, hash: &Hash) -> Result<bool, StoreError>;

    /// Delete by hash
    /// Returns true if deleted, false if didn't exist
    async fn delete(&self, hash: &Hash) -> Result<bool, StoreError>;
}

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Other(String),
}

/// In-memory content-addressed store
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    nodes: Arc<RwLock<HashMap<Hash, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Hash, Vec<u8>>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Hash, Vec<u8>>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored nodes
    pub fn size(&self) -> usize {
        self.read().len()
    }

    /// Total encoded bytes stored
    pub fn total_bytes(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// All stored addresses, in no particular order
    pub fn keys(&self) -> Vec<Hash> {
        self.read().keys().copied().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, hash: Hash, data: Vec<u8>) -> Result<bool, StoreError> {
        let mut nodes = self.write();
        if nodes.contains_key(&hash) {
            return Ok(false);
        }
        nodes.insert(hash, data);
        Ok(true)
    }

    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read().get(hash).cloned())
    }

    async fn has(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.read().contains_key(hash))
    }

    async fn delete(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.write().remove(hash).is_some())
    }
}
