//! In-memory key-value store for testing and ephemeral engines.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::KeyValueStore;

/// An in-memory key-value store.
///
/// Clones share the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of keys stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Get the total size of all values.
    pub fn total_size(&self) -> u64 {
        self.entries
            .read()
            .values()
            .map(|value| value.len() as u64)
            .sum()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
