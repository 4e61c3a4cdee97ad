//! In-memory storage backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{Secret, StorageBackend, StoreError};

/// In-memory storage for session and `none` persistence.
///
/// Data is lost when the process exits.
pub struct MemoryStorage {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("keys_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }
}
