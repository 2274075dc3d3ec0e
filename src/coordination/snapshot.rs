//! Publishing and mirroring the canonical idle snapshot.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{KeySpace, SnapshotField};
use crate::clock::elapsed_ms;
use crate::error::StoreError;
use crate::idle::IdleState;
use crate::store::SharedStore;

/// The session's shared view of idle state and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleSnapshot {
    pub state: IdleState,
    pub remaining_ms: u64,
    pub active_duration_sec: u64,
    pub idle_duration_sec: u64,
    pub last_idle_duration_sec: u64,
    pub total_idle_duration_sec: u64,
    /// Clock time of publication.
    pub updated_at: u64,
}

impl IdleSnapshot {
    /// Remaining time as of `now`, counting down from publication while the
    /// countdown is running. Clamped to `[0, timeout_ms]`.
    pub fn remaining_at(&self, now: u64, timeout_ms: u64) -> u64 {
        let remaining = match self.state {
            IdleState::Idle => 0,
            IdleState::Active | IdleState::Prompted => self
                .remaining_ms
                .saturating_sub(elapsed_ms(self.updated_at, now)),
        };
        remaining.min(timeout_ms)
    }

    fn encode(&self, field: SnapshotField) -> String {
        match field {
            SnapshotField::State => self.state.as_str().to_string(),
            SnapshotField::RemainingMs => self.remaining_ms.to_string(),
            SnapshotField::ActiveDurationSec => self.active_duration_sec.to_string(),
            SnapshotField::IdleDurationSec => self.idle_duration_sec.to_string(),
            SnapshotField::LastIdleDurationSec => self.last_idle_duration_sec.to_string(),
            SnapshotField::TotalIdleDurationSec => self.total_idle_duration_sec.to_string(),
            SnapshotField::UpdatedAt => self.updated_at.to_string(),
        }
    }

    fn apply(&mut self, field: SnapshotField, raw: &str) -> Result<(), String> {
        let counter = |raw: &str| {
            raw.parse::<u64>()
                .map_err(|e| format!("{}: {}", field.name(), e))
        };
        match field {
            SnapshotField::State => self.state = raw.parse()?,
            SnapshotField::RemainingMs => self.remaining_ms = counter(raw)?,
            SnapshotField::ActiveDurationSec => self.active_duration_sec = counter(raw)?,
            SnapshotField::IdleDurationSec => self.idle_duration_sec = counter(raw)?,
            SnapshotField::LastIdleDurationSec => self.last_idle_duration_sec = counter(raw)?,
            SnapshotField::TotalIdleDurationSec => self.total_idle_duration_sec = counter(raw)?,
            SnapshotField::UpdatedAt => self.updated_at = counter(raw)?,
        }
        Ok(())
    }
}

/// The value stored under `activity.last`: who saw input most recently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub tab_id: String,
    pub at: u64,
}

/// Writes the leader's snapshot and mirrors everyone else's.
///
/// Followers only ever update their local mirror; they never write
/// snapshot keys.
pub struct Synchronizer {
    keys: KeySpace,
    store: Arc<dyn SharedStore>,
    mirror: IdleSnapshot,
    /// Whether `mirror` holds a real snapshot rather than the default.
    has_snapshot: bool,
}

impl Synchronizer {
    pub fn new(keys: KeySpace, store: Arc<dyn SharedStore>) -> Self {
        Self {
            keys,
            store,
            mirror: IdleSnapshot::default(),
            has_snapshot: false,
        }
    }

    /// Last snapshot seen from the store (or set locally).
    pub fn mirror(&self) -> &IdleSnapshot {
        &self.mirror
    }

    /// Whether any snapshot has been published or received yet.
    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    pub fn set_mirror(&mut self, snapshot: IdleSnapshot) {
        self.mirror = snapshot;
        self.has_snapshot = true;
    }

    /// Write every snapshot field, `updatedAt` last.
    pub fn publish(&mut self, snapshot: &IdleSnapshot) -> Result<(), StoreError> {
        for field in SnapshotField::ALL {
            self.store
                .set(&self.keys.snapshot(field), &snapshot.encode(field))?;
        }
        self.set_mirror(snapshot.clone());
        Ok(())
    }

    /// Fold one remote field change into the mirror. Returns whether the
    /// value was understood.
    pub fn on_remote_change(&mut self, field: SnapshotField, value: Option<&str>) -> bool {
        let Some(raw) = value else {
            debug!("Snapshot field {} removed", field.name());
            return false;
        };
        match self.mirror.apply(field, raw) {
            Ok(()) => {
                if field == SnapshotField::UpdatedAt {
                    self.has_snapshot = true;
                }
                true
            }
            Err(e) => {
                warn!("Ignoring malformed snapshot field: {}", e);
                false
            }
        }
    }

    /// Re-read every field from the store.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        for field in SnapshotField::ALL {
            let value = self.store.get(&self.keys.snapshot(field))?;
            self.on_remote_change(field, value.as_deref());
        }
        Ok(())
    }

    /// Record that `tab_id` saw input at `at`.
    pub fn announce_activity(&self, tab_id: &str, at: u64) -> Result<(), StoreError> {
        let record = ActivityRecord {
            tab_id: tab_id.to_string(),
            at,
        };
        self.store
            .set(&self.keys.activity(), &serde_json::to_string(&record)?)
    }

    /// Read the current activity record, if any.
    pub fn last_activity(&self) -> Result<Option<ActivityRecord>, StoreError> {
        Ok(self
            .store
            .get(&self.keys.activity())?
            .and_then(|raw| parse_activity(&raw)))
    }
}

/// Decode an `activity.last` value, logging garbage.
pub(crate) fn parse_activity(raw: &str) -> Option<ActivityRecord> {
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Ignoring malformed activity record {:?}: {}", raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::KeyKind;
    use crate::store::MemoryStore;

    fn sample() -> IdleSnapshot {
        IdleSnapshot {
            state: IdleState::Prompted,
            remaining_ms: 8_000,
            active_duration_sec: 22,
            idle_duration_sec: 0,
            last_idle_duration_sec: 5,
            total_idle_duration_sec: 9,
            updated_at: 1_000,
        }
    }

    #[test]
    fn published_fields_use_the_wire_keys() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = Synchronizer::new(KeySpace::new("s"), store.clone());
        sync.publish(&sample()).unwrap();

        assert_eq!(store.get("s.snapshot.state").unwrap().as_deref(), Some("prompted"));
        assert_eq!(store.get("s.snapshot.remainingMs").unwrap().as_deref(), Some("8000"));
        assert_eq!(store.get("s.snapshot.updatedAt").unwrap().as_deref(), Some("1000"));
        assert_eq!(store.len(), 7);
    }

    #[test]
    fn updated_at_is_written_last() {
        let store = Arc::new(MemoryStore::new());
        let mut rx = store.subscribe().unwrap();
        let mut sync = Synchronizer::new(KeySpace::new("s"), store.clone());
        sync.publish(&sample()).unwrap();

        let mut last = None;
        while let Ok(change) = rx.try_recv() {
            last = Some(change.key);
        }
        assert_eq!(last.as_deref(), Some("s.snapshot.updatedAt"));
    }

    #[test]
    fn follower_mirrors_published_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let mut leader = Synchronizer::new(KeySpace::new("s"), store.clone());
        let mut follower = Synchronizer::new(KeySpace::new("s"), store.clone());
        let keys = KeySpace::new("s");
        let mut rx = store.subscribe().unwrap();

        leader.publish(&sample()).unwrap();
        while let Ok(change) = rx.try_recv() {
            if let Some(KeyKind::Snapshot(field)) = keys.classify(&change.key) {
                assert!(follower.on_remote_change(field, change.value.as_deref()));
            }
        }
        assert_eq!(follower.mirror(), &sample());
    }

    #[test]
    fn reload_reads_everything() {
        let store = Arc::new(MemoryStore::new());
        let mut leader = Synchronizer::new(KeySpace::new("s"), store.clone());
        leader.publish(&sample()).unwrap();

        let mut late = Synchronizer::new(KeySpace::new("s"), store);
        assert!(!late.has_snapshot());
        late.reload().unwrap();
        assert!(late.has_snapshot());
        assert_eq!(late.mirror(), &sample());
    }

    #[test]
    fn malformed_fields_leave_mirror_untouched() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = Synchronizer::new(KeySpace::new("s"), store);
        assert!(!sync.on_remote_change(SnapshotField::RemainingMs, Some("-5")));
        assert!(!sync.on_remote_change(SnapshotField::State, Some("sleepy")));
        assert!(!sync.on_remote_change(SnapshotField::State, None));
        assert_eq!(sync.mirror(), &IdleSnapshot::default());
        assert!(!sync.has_snapshot());
    }

    #[test]
    fn remaining_counts_down_from_publication() {
        let snapshot = sample();
        assert_eq!(snapshot.remaining_at(1_000, 30_000), 8_000);
        assert_eq!(snapshot.remaining_at(4_000, 30_000), 5_000);
        assert_eq!(snapshot.remaining_at(60_000, 30_000), 0);
        // Reader clock behind the writer's.
        assert_eq!(snapshot.remaining_at(0, 30_000), 8_000);

        let idle = IdleSnapshot {
            state: IdleState::Idle,
            ..sample()
        };
        assert_eq!(idle.remaining_at(1_000, 30_000), 0);
    }

    #[test]
    fn activity_record_round_trips_through_store() {
        let store = Arc::new(MemoryStore::new());
        let sync = Synchronizer::new(KeySpace::new("s"), store.clone());
        sync.announce_activity("tab-1", 42).unwrap();
        assert_eq!(
            store.get("s.activity.last").unwrap().as_deref(),
            Some(r#"{"tabId":"tab-1","at":42}"#)
        );
        assert_eq!(
            sync.last_activity().unwrap(),
            Some(ActivityRecord {
                tab_id: "tab-1".into(),
                at: 42
            })
        );
    }
}
