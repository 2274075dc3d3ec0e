//! Leader election through a single claim key.
//!
//! A tab takes the claim when it is missing, expired, or already its own,
//! and refreshes it every heartbeat. A claim older than the liveness
//! threshold may be taken by anyone, which covers tabs that vanish without
//! resigning. When two tabs both believe they lead (their writes crossed),
//! the lexicographically lowest tab id keeps leadership and the other steps
//! down; every tab applies the same rule, so they converge without talking.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::elapsed_ms;
use crate::error::StoreError;
use crate::store::SharedStore;

/// The value stored under `leader.claim`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderClaim {
    pub tab_id: String,
    pub last_seen_at: u64,
}

impl LeaderClaim {
    fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(claim) => Some(claim),
            Err(e) => {
                warn!("Ignoring malformed leader claim {:?}: {}", raw, e);
                None
            }
        }
    }
}

/// Leadership flipped for this tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipChange {
    Acquired,
    Lost,
}

fn change(was_leader: bool, is_leader: bool) -> Option<LeadershipChange> {
    match (was_leader, is_leader) {
        (false, true) => Some(LeadershipChange::Acquired),
        (true, false) => Some(LeadershipChange::Lost),
        _ => None,
    }
}

pub struct LeaderElection {
    tab_id: String,
    liveness_timeout_ms: u64,
    key: String,
    store: Arc<dyn SharedStore>,
    is_leader: bool,
    /// Most recent claim seen in the store.
    current: Option<LeaderClaim>,
}

impl LeaderElection {
    pub fn new(
        tab_id: impl Into<String>,
        key: impl Into<String>,
        liveness_timeout_ms: u64,
        store: Arc<dyn SharedStore>,
    ) -> Self {
        Self {
            tab_id: tab_id.into(),
            liveness_timeout_ms,
            key: key.into(),
            store,
            is_leader: false,
            current: None,
        }
    }

    /// Current local belief. Refreshed by `heartbeat` and `observe`.
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn current_claim(&self) -> Option<&LeaderClaim> {
        self.current.as_ref()
    }

    fn is_live(&self, claim: &LeaderClaim, now: u64) -> bool {
        elapsed_ms(claim.last_seen_at, now) <= self.liveness_timeout_ms
    }

    fn should_claim(&self, claim: Option<&LeaderClaim>, now: u64) -> bool {
        match claim {
            None => true,
            Some(c) if c.tab_id == self.tab_id => true,
            Some(c) if !self.is_live(c, now) => true,
            Some(c) => self.is_leader && self.tab_id < c.tab_id,
        }
    }

    fn read_claim(&self) -> Result<Option<LeaderClaim>, StoreError> {
        Ok(self
            .store
            .get(&self.key)?
            .and_then(|raw| LeaderClaim::parse(&raw)))
    }

    /// Whether the last observed claim calls for writing ours right away:
    /// the claim is gone or expired, or it lost a tie-break against us.
    pub fn wants_claim(&self, now: u64) -> bool {
        match &self.current {
            Some(c) if c.tab_id == self.tab_id => false,
            other => self.should_claim(other.as_ref(), now),
        }
    }

    /// Claim or refresh leadership, or step aside for a live leader.
    pub fn heartbeat(&mut self, now: u64) -> Result<Option<LeadershipChange>, StoreError> {
        let was_leader = self.is_leader;
        let claim = self.read_claim()?;

        if self.should_claim(claim.as_ref(), now) {
            if let Some(previous) = claim.as_ref().filter(|c| c.tab_id != self.tab_id) {
                debug!(
                    "Tab {} taking claim from {} (last seen {}ms ago)",
                    self.tab_id,
                    previous.tab_id,
                    elapsed_ms(previous.last_seen_at, now)
                );
            }
            let ours = LeaderClaim {
                tab_id: self.tab_id.clone(),
                last_seen_at: now,
            };
            self.store.set(&self.key, &serde_json::to_string(&ours)?)?;

            // Another writer may have landed between our read and write.
            let confirmed = self.read_claim()?;
            self.is_leader = confirmed.as_ref().is_some_and(|c| c.tab_id == self.tab_id);
            self.current = confirmed;
        } else {
            self.is_leader = false;
            self.current = claim;
        }

        let result = change(was_leader, self.is_leader);
        self.log_change(result);
        Ok(result)
    }

    /// Apply a change notification for the claim key.
    ///
    /// Never promotes: only `heartbeat` writes claims. A live foreign claim
    /// demotes this tab unless this tab wins the tie-break.
    pub fn observe(&mut self, raw: Option<&str>, now: u64) -> Option<LeadershipChange> {
        let was_leader = self.is_leader;
        let claim = raw.and_then(LeaderClaim::parse);

        if let Some(c) = &claim {
            let foreign = c.tab_id != self.tab_id;
            let we_win = self.is_leader && self.tab_id < c.tab_id;
            if foreign && self.is_live(c, now) && !we_win {
                self.is_leader = false;
            }
        }
        self.current = claim;

        let result = change(was_leader, self.is_leader);
        self.log_change(result);
        result
    }

    /// Give up leadership, clearing the claim if it is still ours.
    pub fn resign(&mut self) -> Result<Option<LeadershipChange>, StoreError> {
        if !self.is_leader {
            return Ok(None);
        }
        self.is_leader = false;

        if self
            .read_claim()?
            .is_some_and(|c| c.tab_id == self.tab_id)
        {
            self.store.remove(&self.key)?;
        }
        self.current = None;
        info!("Tab {} resigned leadership", self.tab_id);
        Ok(Some(LeadershipChange::Lost))
    }

    /// Forget leadership without touching the store.
    pub fn abandon(&mut self) {
        self.is_leader = false;
        self.current = None;
    }

    fn log_change(&self, change: Option<LeadershipChange>) {
        match change {
            Some(LeadershipChange::Acquired) => info!("Tab {} became leader", self.tab_id),
            Some(LeadershipChange::Lost) => {
                let holder = self
                    .current
                    .as_ref()
                    .map(|c| c.tab_id.as_str())
                    .unwrap_or("nobody");
                info!("Tab {} lost leadership to {}", self.tab_id, holder)
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const LIVENESS: u64 = 3_000;
    const KEY: &str = "s.leader.claim";

    fn election(id: &str, store: &Arc<MemoryStore>) -> LeaderElection {
        LeaderElection::new(id, KEY, LIVENESS, store.clone())
    }

    fn claim(id: &str, at: u64) -> String {
        serde_json::to_string(&LeaderClaim {
            tab_id: id.to_string(),
            last_seen_at: at,
        })
        .unwrap()
    }

    #[test]
    fn first_heartbeat_claims_empty_store() {
        let store = Arc::new(MemoryStore::new());
        let mut a = election("a", &store);
        assert_eq!(a.heartbeat(0).unwrap(), Some(LeadershipChange::Acquired));
        assert!(a.is_leader());

        let stored: LeaderClaim =
            serde_json::from_str(&store.get(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.tab_id, "a");
        assert_eq!(stored.last_seen_at, 0);
    }

    #[test]
    fn live_claim_is_respected_even_by_lower_id() {
        let store = Arc::new(MemoryStore::new());
        let mut b = election("b", &store);
        let mut a = election("a", &store);
        b.heartbeat(0).unwrap();

        assert_eq!(a.heartbeat(500).unwrap(), None);
        assert!(!a.is_leader());
        assert!(b.is_leader());
    }

    #[test]
    fn stale_claim_is_usurped() {
        let store = Arc::new(MemoryStore::new());
        let mut a = election("a", &store);
        let mut b = election("b", &store);
        b.heartbeat(0).unwrap();
        a.heartbeat(1_000).unwrap();
        assert!(!a.is_leader());

        // `b` stops heartbeating.
        assert_eq!(a.heartbeat(3_000).unwrap(), None);
        assert_eq!(a.heartbeat(3_001).unwrap(), Some(LeadershipChange::Acquired));

        // `b` learns it lost when the notification arrives.
        assert_eq!(
            b.observe(store.get(KEY).unwrap().as_deref(), 3_001),
            Some(LeadershipChange::Lost)
        );
    }

    #[test]
    fn crossed_claims_resolve_to_lowest_id() {
        let store = Arc::new(MemoryStore::new());
        let mut a = election("a", &store);
        let mut b = election("b", &store);

        // Both claimed from an empty store; `b` wrote last.
        a.heartbeat(0).unwrap();
        store.set(KEY, &claim("b", 0)).unwrap();
        b.is_leader = true;
        b.current = Some(LeaderClaim {
            tab_id: "b".into(),
            last_seen_at: 0,
        });

        // `a` sees `b`'s claim but wins the tie-break.
        assert_eq!(a.observe(Some(&claim("b", 0)), 10), None);
        assert!(a.wants_claim(10));
        a.heartbeat(10).unwrap();
        assert!(a.is_leader());

        // `b` sees `a`'s claim and yields.
        assert_eq!(
            b.observe(Some(&claim("a", 10)), 10),
            Some(LeadershipChange::Lost)
        );
        assert!(!b.wants_claim(10));
        b.heartbeat(1_000).unwrap();
        assert!(!b.is_leader());
    }

    #[test]
    fn heartbeat_refreshes_own_claim() {
        let store = Arc::new(MemoryStore::new());
        let mut a = election("a", &store);
        a.heartbeat(0).unwrap();
        assert_eq!(a.heartbeat(10_000).unwrap(), None);
        assert!(a.is_leader());
        assert_eq!(a.current_claim().map(|c| c.last_seen_at), Some(10_000));
    }

    #[test]
    fn resign_clears_claim_and_invites_takeover() {
        let store = Arc::new(MemoryStore::new());
        let mut a = election("a", &store);
        let mut b = election("b", &store);
        a.heartbeat(0).unwrap();
        b.heartbeat(0).unwrap();

        assert_eq!(a.resign().unwrap(), Some(LeadershipChange::Lost));
        assert_eq!(store.get(KEY).unwrap(), None);

        assert_eq!(b.observe(None, 100), None);
        assert!(b.wants_claim(100));
        assert_eq!(b.heartbeat(100).unwrap(), Some(LeadershipChange::Acquired));
    }

    #[test]
    fn resign_leaves_foreign_claim_alone() {
        let store = Arc::new(MemoryStore::new());
        let mut a = election("a", &store);
        a.heartbeat(0).unwrap();
        store.set(KEY, &claim("z", 50)).unwrap();
        a.resign().unwrap();
        assert_eq!(store.get(KEY).unwrap(), Some(claim("z", 50)));
    }

    #[test]
    fn malformed_claim_is_overwritten() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "garbage").unwrap();
        let mut a = election("a", &store);
        assert_eq!(a.heartbeat(0).unwrap(), Some(LeadershipChange::Acquired));
    }

    #[test]
    fn own_notification_never_promotes() {
        let store = Arc::new(MemoryStore::new());
        let mut a = election("a", &store);
        assert_eq!(a.observe(Some(&claim("a", 0)), 0), None);
        assert!(!a.is_leader());
        assert!(!a.wants_claim(0));
    }
}
