//! The per-tab engine tying idle detection to cross-tab coordination.
//!
//! Everything here is synchronous and single-threaded: the host (or
//! [`crate::runtime::TabRuntime`]) feeds input through [`TabEngine::submit`]
//! and calls [`TabEngine::poll`] on a timer. Time is read from the injected
//! clock, never from the system directly.
//!
//! The leader owns the canonical countdown and counters and publishes them;
//! followers run the same local machinery but only report what they mirror
//! from the store. If the store fails, the tab falls back to acting alone.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{elapsed_ms, Clock};
use crate::config::EngineConfig;
use crate::coordination::{
    parse_activity, IdleSnapshot, KeyKind, KeySpace, LeaderElection, LeadershipChange,
    Synchronizer,
};
use crate::error::{ConfigError, StoreError};
use crate::idle::{
    ActivityEvent, Debouncer, DurationAccumulator, IdleCallbacks, IdleEvent, IdleState,
    IdleStateMachine,
};
use crate::store::{SharedStore, StoreChange};

/// Period of the duration accounting tick.
pub const TICK_MS: u64 = 1_000;

/// Capacity of the tab event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Whether cross-tab coordination is working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Connected,
    /// The store failed; this tab detects idleness on its own and its view
    /// may disagree with other tabs.
    Degraded { reason: String },
}

/// Something the host may want to react to or record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Idle(IdleEvent),
    LeadershipAcquired,
    LeadershipLost,
    StoreDegraded { reason: String },
}

/// Public view of one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInstance {
    pub tab_id: String,
    pub is_leader: bool,
    /// Last successful heartbeat, on the engine clock.
    pub last_seen_at: u64,
}

pub struct TabEngine {
    tab_id: String,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    changes: Option<broadcast::Receiver<StoreChange>>,
    debouncer: Debouncer,
    machine: IdleStateMachine,
    durations: DurationAccumulator,
    election: LeaderElection,
    sync: Synchronizer,
    status: SyncStatus,
    /// State last reported to the host through events.
    reported_state: IdleState,
    last_active_tab: Option<String>,
    last_seen_at: u64,
    next_tick_at: u64,
    next_heartbeat_at: u64,
    started: bool,
    stopped: bool,
    callbacks: Option<Box<dyn IdleCallbacks>>,
    events_tx: broadcast::Sender<TabEvent>,
}

impl TabEngine {
    /// Create an engine with a freshly generated tab id.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        Self::with_tab_id(Uuid::new_v4().to_string(), config, store, clock)
    }

    /// Create an engine with a caller-chosen tab id.
    pub fn with_tab_id(
        tab_id: impl Into<String>,
        config: EngineConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let tab_id = tab_id.into();
        let now = clock.now_ms();
        let keys = KeySpace::new(config.session_key.clone());
        let election = LeaderElection::new(
            tab_id.clone(),
            keys.leader_claim(),
            config.liveness_timeout_ms,
            store.clone(),
        );
        let sync = Synchronizer::new(keys.clone(), store.clone());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            debouncer: Debouncer::new(config.debounce_ms),
            machine: IdleStateMachine::new(config.timeout_ms, config.prompt_lead_ms, now),
            durations: DurationAccumulator::new(),
            election,
            sync,
            keys,
            changes: None,
            status: SyncStatus::Connected,
            reported_state: IdleState::Active,
            last_active_tab: None,
            last_seen_at: now,
            next_tick_at: now + TICK_MS,
            next_heartbeat_at: now,
            started: false,
            stopped: false,
            callbacks: None,
            events_tx,
            tab_id,
            config,
            clock,
            store,
        })
    }

    /// Install host callbacks, replacing any previous ones.
    pub fn set_callbacks(&mut self, callbacks: Box<dyn IdleCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    /// Subscribe to tab events.
    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Join the session: listen to the store, load the shared state and run
    /// a first election round. Calling it again does nothing.
    pub fn start(&mut self) {
        if self.started || self.stopped {
            return;
        }
        self.started = true;

        info!(
            "Tab {} joining session {:?} (timeout={}ms, prompt lead={}ms)",
            self.tab_id,
            self.keys.session(),
            self.config.timeout_ms,
            self.config.prompt_lead_ms
        );

        let now = self.clock.now_ms();
        match self.store.subscribe() {
            Ok(rx) => self.changes = Some(rx),
            Err(e) => {
                self.degrade(e, now);
                return;
            }
        }
        self.resync(now);
        self.next_heartbeat_at = now + self.config.heartbeat_ms;

        // Joining an ongoing session is not a transition.
        if self.uses_mirror() {
            self.reported_state = self.sync.mirror().state;
        }
    }

    /// Feed one raw input event. Returns whether the event kind counts as
    /// activity.
    pub fn submit(&mut self, event: ActivityEvent) -> bool {
        if self.stopped {
            return false;
        }
        if !self.config.events.contains(&event.kind) {
            debug!("Ignoring {} input", event.kind);
            return false;
        }

        let now = self.clock.now_ms();
        debug!("User did {}, timer reset", event.kind);
        if self.debouncer.submit(event.timestamp.min(now)).is_some() {
            self.handle_pulse(now);
        }
        true
    }

    /// Reset the countdown immediately, bypassing the debouncer.
    pub fn activate(&mut self) {
        if self.stopped {
            return;
        }
        self.debouncer.cancel();
        let now = self.clock.now_ms();
        self.handle_pulse(now);
    }

    /// Advance timers: store notifications, the debounced pulse, duration
    /// ticks, the countdown and the heartbeat.
    pub fn poll(&mut self) {
        if self.stopped {
            return;
        }
        if !self.started {
            self.start();
        }
        let now = self.clock.now_ms();

        self.drain_changes(now);

        if self.debouncer.poll(now).is_some() {
            self.handle_pulse(now);
        }

        // A clock that stepped backwards must not stall the tick.
        if self.next_tick_at > now + TICK_MS {
            self.next_tick_at = now + TICK_MS;
        }
        if self.next_heartbeat_at > now + self.config.heartbeat_ms {
            self.next_heartbeat_at = now;
        }
        self.run_ticks(now);

        self.advance(now);

        if self.is_connected() && now >= self.next_heartbeat_at {
            self.run_heartbeat(now);
            self.next_heartbeat_at = now + self.config.heartbeat_ms;
        }

        self.report_mirror();
    }

    /// Apply one store change notification.
    pub fn on_remote_change(&mut self, change: StoreChange) {
        let now = self.clock.now_ms();
        self.handle_change(change, now);
        self.report_mirror();
    }

    /// Leave the session: cancel pending work and hand leadership back.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.debouncer.cancel();
        self.changes = None;

        if self.is_connected() && self.election.is_leader() {
            let now = self.clock.now_ms();
            let snapshot = self.snapshot_at(now);
            if let Err(e) = self.sync.publish(&snapshot) {
                warn!("Failed to publish final snapshot: {}", e);
            }
            match self.election.resign() {
                Ok(Some(_)) => self.emit(TabEvent::LeadershipLost),
                Ok(None) => {}
                Err(e) => warn!("Failed to resign leadership: {}", e),
            }
        }
        info!("Tab {} left session {:?}", self.tab_id, self.keys.session());
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Whether this tab currently acts as the session authority.
    ///
    /// A degraded tab is its own authority and returns `true` here even
    /// though other tabs may do the same. Hosts that run once-per-session
    /// side effects should also check [`TabEngine::is_connected`].
    pub fn is_leader(&self) -> bool {
        self.is_authority()
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == SyncStatus::Connected
    }

    /// Session state as this tab sees it.
    pub fn state(&self) -> IdleState {
        if self.uses_mirror() {
            self.sync.mirror().state
        } else {
            self.machine.state()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state() == IdleState::Idle
    }

    /// Milliseconds until the session goes idle, never negative.
    pub fn remaining_time(&self) -> u64 {
        let now = self.clock.now_ms();
        if self.uses_mirror() {
            self.sync.mirror().remaining_at(now, self.config.timeout_ms)
        } else {
            self.machine.remaining_ms(now)
        }
    }

    /// Whether the most recent activity in the session happened in this tab.
    pub fn is_last_active_tab(&self) -> bool {
        if !self.is_connected() {
            return true;
        }
        match &self.last_active_tab {
            None => true,
            Some(id) => *id == self.tab_id,
        }
    }

    /// Current snapshot: computed locally by the authority, mirrored
    /// otherwise.
    pub fn snapshot(&self) -> IdleSnapshot {
        if self.uses_mirror() {
            self.sync.mirror().clone()
        } else {
            self.snapshot_at(self.clock.now_ms())
        }
    }

    pub fn instance(&self) -> TabInstance {
        TabInstance {
            tab_id: self.tab_id.clone(),
            is_leader: self.is_leader(),
            last_seen_at: self.last_seen_at,
        }
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn is_authority(&self) -> bool {
        !self.is_connected() || self.election.is_leader()
    }

    fn uses_mirror(&self) -> bool {
        !self.is_authority() && self.sync.has_snapshot()
    }

    fn snapshot_at(&self, now: u64) -> IdleSnapshot {
        IdleSnapshot {
            state: self.machine.state(),
            remaining_ms: self.machine.remaining_ms(now),
            active_duration_sec: self.durations.active_secs,
            idle_duration_sec: self.durations.idle_secs,
            last_idle_duration_sec: self.durations.last_idle_secs,
            total_idle_duration_sec: self.durations.total_idle_secs,
            updated_at: now,
        }
    }

    fn emit(&mut self, event: TabEvent) {
        if let TabEvent::Idle(idle_event) = &event {
            if let Some(callbacks) = self.callbacks.as_mut() {
                idle_event.dispatch(callbacks.as_mut());
            }
        }
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Report transitions of the canonical machine. Callers publish.
    fn apply_machine_events(&mut self, events: Vec<IdleEvent>, now: u64) {
        if events.is_empty() {
            return;
        }
        let mut from = self.reported_state;
        for event in events {
            match event {
                IdleEvent::Prompted => {
                    info!("Session prompted: {}ms left", self.machine.remaining_ms(now));
                    from = IdleState::Prompted;
                }
                IdleEvent::Idle => {
                    info!("Session idle");
                    from = IdleState::Idle;
                }
                IdleEvent::Active { idle_duration_secs } => {
                    if from == IdleState::Idle {
                        self.durations.end_idle_episode(idle_duration_secs);
                    }
                    info!("Session active again after {}s idle", idle_duration_secs);
                    from = IdleState::Active;
                }
            }
            self.emit(TabEvent::Idle(event));
        }
        self.reported_state = self.machine.state();
    }

    fn handle_pulse(&mut self, now: u64) {
        let event = self.machine.activate(now);
        if self.is_authority() {
            self.apply_machine_events(event.into_iter().collect(), now);
            self.publish(now);
        }

        self.last_active_tab = Some(self.tab_id.clone());
        if self.is_connected() {
            if let Err(e) = self.sync.announce_activity(&self.tab_id, now) {
                self.degrade(e, now);
            }
        }
    }

    /// Run every tick due by `now` in one step.
    ///
    /// Each tick counts the second ending at it with the state held during
    /// that second, then moves the countdown to it. The tick at or after the
    /// deadline is the last one counted active. After a long gap (a
    /// suspended host) the counters are updated in bulk and the snapshot is
    /// published once.
    fn run_ticks(&mut self, now: u64) {
        if self.next_tick_at > now {
            return;
        }
        let count = (now - self.next_tick_at) / TICK_MS + 1;
        let last = self.next_tick_at + (count - 1) * TICK_MS;

        if self.is_authority() {
            let active = if self.machine.is_idle() {
                0
            } else {
                let ticks_to_deadline = self
                    .machine
                    .deadline_ms()
                    .saturating_sub(self.next_tick_at)
                    .div_ceil(TICK_MS);
                (ticks_to_deadline + 1).min(count)
            };
            if count > 1 {
                debug!("Catching up {} ticks ({} active)", count, active);
            }
            self.durations.add(active, count - active);
            let events = self.machine.advance(last);
            self.apply_machine_events(events, last);
            self.publish(last);
        } else {
            self.machine.advance(last);
        }
        self.next_tick_at = last + TICK_MS;
    }

    fn advance(&mut self, now: u64) {
        let events = self.machine.advance(now);
        if self.is_authority() && !events.is_empty() {
            self.apply_machine_events(events, now);
            self.publish(now);
        }
    }

    fn publish(&mut self, now: u64) {
        if !self.is_connected() || !self.election.is_leader() {
            return;
        }
        let snapshot = self.snapshot_at(now);
        if let Err(e) = self.sync.publish(&snapshot) {
            self.degrade(e, now);
        }
    }

    fn drain_changes(&mut self, now: u64) {
        loop {
            let next = match self.changes.as_mut() {
                Some(rx) => rx.try_recv(),
                None => return,
            };
            match next {
                Ok(change) => self.handle_change(change, now),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("Missed {} store notifications, re-reading shared state", missed);
                    self.resync(now);
                }
                Err(TryRecvError::Closed) => {
                    self.degrade(
                        StoreError::Unavailable("change feed closed".to_string()),
                        now,
                    );
                    return;
                }
            }
        }
    }

    fn handle_change(&mut self, change: StoreChange, now: u64) {
        if !self.is_connected() || self.stopped {
            return;
        }
        let Some(kind) = self.keys.classify(&change.key) else {
            return;
        };

        match kind {
            KeyKind::LeaderClaim => {
                let result = self.election.observe(change.value.as_deref(), now);
                self.on_leadership(result, now);
                if self.election.wants_claim(now) {
                    self.run_heartbeat(now);
                }
            }
            KeyKind::Activity => {
                let Some(record) = change.value.as_deref().and_then(parse_activity) else {
                    return;
                };
                let remote = record.tab_id != self.tab_id;
                self.last_active_tab = Some(record.tab_id);
                if remote && self.election.is_leader() {
                    let event = self.machine.activate(now);
                    self.apply_machine_events(event.into_iter().collect(), now);
                    self.publish(now);
                }
            }
            KeyKind::Snapshot(field) => {
                if !self.election.is_leader() {
                    self.sync.on_remote_change(field, change.value.as_deref());
                }
            }
        }
    }

    /// Re-read the shared state and re-run the election.
    fn resync(&mut self, now: u64) {
        let loaded = self
            .sync
            .reload()
            .and_then(|()| self.sync.last_activity());
        match loaded {
            Ok(record) => {
                if let Some(record) = record {
                    self.last_active_tab = Some(record.tab_id);
                }
            }
            Err(e) => {
                self.degrade(e, now);
                return;
            }
        }
        self.run_heartbeat(now);
    }

    fn run_heartbeat(&mut self, now: u64) {
        match self.election.heartbeat(now) {
            Ok(result) => {
                self.last_seen_at = now;
                self.on_leadership(result, now);
            }
            Err(e) => self.degrade(e, now),
        }
    }

    fn on_leadership(&mut self, change: Option<LeadershipChange>, now: u64) {
        match change {
            Some(LeadershipChange::Acquired) => {
                self.adopt_mirror(now);
                self.emit(TabEvent::LeadershipAcquired);
                self.publish(now);
            }
            Some(LeadershipChange::Lost) => {
                // Keep showing our own last view until the new leader publishes.
                let own = self.snapshot_at(now);
                self.sync.set_mirror(own);
                self.emit(TabEvent::LeadershipLost);
            }
            None => {}
        }
    }

    /// Continue the countdown and counters the previous leader published.
    fn adopt_mirror(&mut self, now: u64) {
        if !self.sync.has_snapshot() {
            return;
        }
        let mirror = self.sync.mirror().clone();
        let remaining = mirror.remaining_at(now, self.config.timeout_ms);
        let gap_ms = elapsed_ms(mirror.updated_at, now);
        debug!(
            "Tab {} adopting {} snapshot ({}ms left, published {}ms ago)",
            self.tab_id, mirror.state, remaining, gap_ms
        );

        // Time since the last publication still belongs to the session:
        // active until the published deadline, idle after it.
        let active_gap_ms = match mirror.state {
            IdleState::Idle => 0,
            IdleState::Active | IdleState::Prompted => gap_ms.min(mirror.remaining_ms),
        };
        let gap_secs = gap_ms / 1_000;
        let idle_gap_secs = (gap_ms - active_gap_ms) / 1_000;

        self.machine.restore(
            mirror.state,
            remaining,
            mirror.idle_duration_sec * 1_000 + gap_ms,
            now,
        );
        self.durations = DurationAccumulator {
            active_secs: mirror.active_duration_sec,
            idle_secs: mirror.idle_duration_sec,
            last_idle_secs: mirror.last_idle_duration_sec,
            total_idle_secs: mirror.total_idle_duration_sec,
        };
        self.durations.add(gap_secs - idle_gap_secs, idle_gap_secs);
        self.reported_state = self.machine.state();
    }

    /// Fire events for state changes seen in the mirror (followers only).
    fn report_mirror(&mut self) {
        if !self.uses_mirror() {
            return;
        }
        let mirror = self.sync.mirror();
        let next = mirror.state;
        let last_idle = mirror.last_idle_duration_sec;
        if next == self.reported_state {
            return;
        }

        let prompt_enabled = self.config.prompt_lead_ms > 0;
        let events = match (self.reported_state, next) {
            (IdleState::Active, IdleState::Prompted) => vec![IdleEvent::Prompted],
            (IdleState::Active, IdleState::Idle) if prompt_enabled => {
                vec![IdleEvent::Prompted, IdleEvent::Idle]
            }
            (IdleState::Active, IdleState::Idle) => vec![IdleEvent::Idle],
            (IdleState::Prompted, IdleState::Idle) => vec![IdleEvent::Idle],
            (IdleState::Prompted, IdleState::Active) => vec![IdleEvent::Active {
                idle_duration_secs: 0,
            }],
            (IdleState::Idle, IdleState::Active) => vec![IdleEvent::Active {
                idle_duration_secs: last_idle,
            }],
            (IdleState::Idle, IdleState::Prompted) => vec![
                IdleEvent::Active {
                    idle_duration_secs: last_idle,
                },
                IdleEvent::Prompted,
            ],
            _ => Vec::new(),
        };

        debug!("Mirrored session state {} -> {}", self.reported_state, next);
        self.reported_state = next;
        for event in events {
            self.emit(TabEvent::Idle(event));
        }
    }

    /// Fall back to single-tab operation for the rest of the session.
    fn degrade(&mut self, error: StoreError, now: u64) {
        if !self.is_connected() {
            return;
        }
        let reason = error.to_string();
        warn!(
            "Tab {}: {}; continuing without cross-tab sync",
            self.tab_id, reason
        );

        let was_leader = self.election.is_leader();
        self.election.abandon();
        self.changes = None;
        if !was_leader {
            self.adopt_mirror(now);
        }
        self.status = SyncStatus::Degraded {
            reason: reason.clone(),
        };
        self.reported_state = self.machine.state();
        self.emit(TabEvent::StoreDegraded { reason });
    }
}

impl Drop for TabEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
