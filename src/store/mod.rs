//! Shared key-value store with change notifications.
//!
//! This is the only channel between tabs. Each key is a last-write-wins
//! register; subscribers hear about every change in the order the store
//! applied it.

mod file;
mod memory;

use tokio::sync::broadcast;

use crate::error::StoreError;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Capacity of change-notification channels. A subscriber that falls
/// further behind than this gets `Lagged` and must re-read the keys it
/// cares about.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A key changed value. `None` means the key was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<String>,
}

impl StoreChange {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A string-keyed store visible to every tab of a session.
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value. Subscribers are notified only if the value changed.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Listen for changes made by anyone, this process included.
    fn subscribe(&self) -> Result<broadcast::Receiver<StoreChange>, StoreError>;
}
