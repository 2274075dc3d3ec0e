//! In-process shared store.

use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

use super::{SharedStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;

/// A store held in memory, shared between engines through an `Arc`.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    changes_tx: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes_tx,
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            // No subscribers is fine.
            let _ = self
                .changes_tx
                .send(StoreChange::new(key, Some(value.to_string())));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if entries.remove(key).is_some() {
            let _ = self.changes_tx.send(StoreChange::new(key, None));
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<StoreChange>, StoreError> {
        Ok(self.changes_tx.subscribe())
    }
}
