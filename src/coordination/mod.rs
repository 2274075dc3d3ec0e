//! Cross-tab coordination: leader election and snapshot mirroring.
//!
//! Every key lives under the session key, so several sessions can share
//! one store:
//!
//! ```text
//! <session>.leader.claim                  {"tabId": "...", "lastSeenAt": 1700000000000}
//! <session>.activity.last                 {"tabId": "...", "at": 1700000000000}
//! <session>.snapshot.state                active | prompted | idle
//! <session>.snapshot.remainingMs          decimal
//! <session>.snapshot.activeDurationSec    decimal
//! <session>.snapshot.idleDurationSec      decimal
//! <session>.snapshot.lastIdleDurationSec  decimal
//! <session>.snapshot.totalIdleDurationSec decimal
//! <session>.snapshot.updatedAt            decimal
//! ```

mod election;
mod snapshot;

pub use election::{LeaderClaim, LeaderElection, LeadershipChange};
pub(crate) use snapshot::parse_activity;
pub use snapshot::{ActivityRecord, IdleSnapshot, Synchronizer};

/// One field of the published snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotField {
    State,
    RemainingMs,
    ActiveDurationSec,
    IdleDurationSec,
    LastIdleDurationSec,
    TotalIdleDurationSec,
    UpdatedAt,
}

impl SnapshotField {
    /// Publication order: counters first, `updatedAt` last, so a reader that
    /// sees the new timestamp has already seen the fields it covers.
    pub const ALL: [SnapshotField; 7] = [
        SnapshotField::ActiveDurationSec,
        SnapshotField::IdleDurationSec,
        SnapshotField::LastIdleDurationSec,
        SnapshotField::TotalIdleDurationSec,
        SnapshotField::RemainingMs,
        SnapshotField::State,
        SnapshotField::UpdatedAt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SnapshotField::State => "snapshot.state",
            SnapshotField::RemainingMs => "snapshot.remainingMs",
            SnapshotField::ActiveDurationSec => "snapshot.activeDurationSec",
            SnapshotField::IdleDurationSec => "snapshot.idleDurationSec",
            SnapshotField::LastIdleDurationSec => "snapshot.lastIdleDurationSec",
            SnapshotField::TotalIdleDurationSec => "snapshot.totalIdleDurationSec",
            SnapshotField::UpdatedAt => "snapshot.updatedAt",
        }
    }
}

/// What a store key means to this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    LeaderClaim,
    Activity,
    Snapshot(SnapshotField),
}

const LEADER_CLAIM: &str = "leader.claim";
const ACTIVITY: &str = "activity.last";

/// Key names for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    session: String,
}

impl KeySpace {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.session, name)
    }

    pub fn leader_claim(&self) -> String {
        self.key(LEADER_CLAIM)
    }

    pub fn activity(&self) -> String {
        self.key(ACTIVITY)
    }

    pub fn snapshot(&self, field: SnapshotField) -> String {
        self.key(field.name())
    }

    /// Map a raw store key back to its meaning. Keys of other sessions and
    /// unknown keys yield `None`.
    pub fn classify(&self, key: &str) -> Option<KeyKind> {
        let name = key
            .strip_prefix(self.session.as_str())?
            .strip_prefix('.')?;
        match name {
            LEADER_CLAIM => Some(KeyKind::LeaderClaim),
            ACTIVITY => Some(KeyKind::Activity),
            _ => SnapshotField::ALL
                .into_iter()
                .find(|field| field.name() == name)
                .map(KeyKind::Snapshot),
        }
    }
}
