//! Shared store backed by a JSON file, for tabs living in separate processes.
//!
//! The whole map is one JSON object, replaced atomically on every write.
//! A watcher thread polls the file and broadcasts changes made by other
//! processes; writes from this process are broadcast directly.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{SharedStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;

type Entries = BTreeMap<String, String>;

/// Shared state between the store handle and its watcher thread.
struct Inner {
    path: PathBuf,
    /// Last contents this process wrote or announced.
    known: Mutex<Entries>,
    running: AtomicBool,
    changes_tx: broadcast::Sender<StoreChange>,
}

impl Inner {
    fn read_file(&self) -> Result<Entries, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Entries::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, entries: &Entries) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension(format!("tmp.{}", std::process::id()));
        let data = serde_json::to_vec(entries)?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn lock_known(&self) -> Result<std::sync::MutexGuard<'_, Entries>, StoreError> {
        self.known
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".to_string()))
    }

    /// Read-modify-write one key. Returns the change if the value differs.
    fn update(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut known = self.lock_known()?;
        let mut entries = self.read_file()?;

        let previous = match value {
            Some(v) => entries.insert(key.to_string(), v.to_string()),
            None => entries.remove(key),
        };
        if previous.as_deref() == value {
            return Ok(());
        }

        self.write_file(&entries)?;
        announce_diff(&known, &entries, &self.changes_tx);
        *known = entries;
        Ok(())
    }
}

/// Broadcast every key whose value differs between `old` and `new`.
fn announce_diff(old: &Entries, new: &Entries, tx: &broadcast::Sender<StoreChange>) {
    for (key, value) in new {
        if old.get(key) != Some(value) {
            let _ = tx.send(StoreChange::new(key.clone(), Some(value.clone())));
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            let _ = tx.send(StoreChange::new(key.clone(), None));
        }
    }
}

/// A store persisted to a single JSON file.
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    /// Open (or create) the store at `path` and start watching it.
    pub fn open(path: impl AsRef<Path>, watch_interval: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            path,
            known: Mutex::new(Entries::new()),
            running: AtomicBool::new(true),
            changes_tx,
        });

        let initial = inner.read_file()?;
        *inner.lock_known()? = initial;

        info!("File store opened at {:?}", inner.path);

        let watcher = inner.clone();
        thread::Builder::new()
            .name("store-watcher".to_string())
            .spawn(move || run_watcher(watcher, watch_interval))?;

        Ok(Self { inner })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Stop the watcher thread.
    pub fn close(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Every key and value currently on disk.
    pub fn entries(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.inner.read_file()?.into_iter().collect())
    }
}

impl SharedStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read_file()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.update(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.update(key, None)
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<StoreChange>, StoreError> {
        Ok(self.inner.changes_tx.subscribe())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Poll the file and announce writes made by other processes.
fn run_watcher(inner: Arc<Inner>, interval: Duration) {
    debug!("Store watcher started for {:?}", inner.path);
    let mut failing = false;

    while inner.running.load(Ordering::SeqCst) {
        thread::sleep(interval);

        // Read under the lock: a local write must not land between read and compare.
        let Ok(mut known) = inner.known.lock() else {
            break;
        };
        let current = match inner.read_file() {
            Ok(entries) => {
                failing = false;
                entries
            }
            Err(e) => {
                if !failing {
                    warn!("Failed to read store file {:?}: {}", inner.path, e);
                    failing = true;
                }
                continue;
            }
        };

        if *known != current {
            announce_diff(&known, &current, &inner.changes_tx);
            *known = current;
        }
    }

    debug!("Store watcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> FileStore {
        FileStore::open(dir.path().join("store.json"), Duration::from_millis(10)).unwrap()
    }

    #[test]
    fn values_persist_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.set("session.leader.claim", "{}").unwrap();

        let other = open(&dir);
        assert_eq!(
            other.get("session.leader.claim").unwrap().as_deref(),
            Some("{}")
        );
        assert_eq!(other.entries().unwrap().len(), 1);
    }

    #[test]
    fn local_writes_are_announced_once() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let mut rx = store.subscribe().unwrap();

        store.set("k", "1").unwrap();
        store.set("k", "1").unwrap();
        store.remove("k").unwrap();

        assert_eq!(rx.try_recv().unwrap(), StoreChange::new("k", Some("1".into())));
        assert_eq!(rx.try_recv().unwrap(), StoreChange::new("k", None));

        // The watcher must not re-announce what this process wrote.
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn watcher_sees_other_process_writes() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let mut rx = store.subscribe().unwrap();

        // Simulate another process replacing the file.
        let path = store.path().to_path_buf();
        std::fs::write(&path, r#"{"k":"remote"}"#).unwrap();

        let mut received = None;
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(10));
            if let Ok(change) = rx.try_recv() {
                received = Some(change);
                break;
            }
        }
        assert_eq!(received, Some(StoreChange::new("k", Some("remote".into()))));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        std::fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.get("k"), Err(StoreError::Encoding(_))));
    }
}
