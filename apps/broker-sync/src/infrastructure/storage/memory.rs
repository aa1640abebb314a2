//! In-process key-value store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::application::ports::{KeyValueStore, StorageChange, StoreError};

use super::CHANGE_CAPACITY;

/// Key-value store held in memory, shared by every component of a process.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn notify(&self, key: &str, value: Option<String>) {
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value,
        });
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            self.notify(key, None);
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
