//! Two-stage idle countdown: `Active -> Prompted -> Idle`.
//!
//! Time is passed in explicitly, so the machine never reads a clock of its
//! own. Any activation resets the countdown from every state.

use tracing::debug;

use super::{IdleEvent, IdleState};
use crate::clock::elapsed_ms;

#[derive(Debug, Clone)]
pub struct IdleStateMachine {
    timeout_ms: u64,
    prompt_lead_ms: u64,
    state: IdleState,
    /// Clock time at which the countdown reaches zero.
    deadline_ms: u64,
    /// When the current idle episode began.
    idle_started_at: Option<u64>,
}

impl IdleStateMachine {
    /// Start in `Active` with a full countdown.
    pub fn new(timeout_ms: u64, prompt_lead_ms: u64, now: u64) -> Self {
        Self {
            timeout_ms,
            prompt_lead_ms,
            state: IdleState::Active,
            deadline_ms: now + timeout_ms,
            idle_started_at: None,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == IdleState::Idle
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn idle_started_at(&self) -> Option<u64> {
        self.idle_started_at
    }

    /// Clock time at which the countdown reaches zero.
    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    /// Time left before idle, always within `[0, timeout]`.
    pub fn remaining_ms(&self, now: u64) -> u64 {
        if self.state == IdleState::Idle {
            return 0;
        }
        self.deadline_ms.saturating_sub(now).min(self.timeout_ms)
    }

    /// Reset the countdown and return to `Active`.
    ///
    /// Emits `Active` when leaving `Prompted` or `Idle`, carrying the length
    /// of the idle episode in whole seconds (zero when only prompted).
    pub fn activate(&mut self, now: u64) -> Option<IdleEvent> {
        let event = match self.state {
            IdleState::Active => None,
            IdleState::Prompted => Some(IdleEvent::Active {
                idle_duration_secs: 0,
            }),
            IdleState::Idle => {
                let idle_ms = self
                    .idle_started_at
                    .map(|start| elapsed_ms(start, now))
                    .unwrap_or(0);
                Some(IdleEvent::Active {
                    idle_duration_secs: (idle_ms + 500) / 1000,
                })
            }
        };

        if event.is_some() {
            debug!("Idle state {} -> active", self.state);
        }

        self.state = IdleState::Active;
        self.deadline_ms = now + self.timeout_ms;
        self.idle_started_at = None;
        event
    }

    /// Move the countdown to `now`, returning transitions in order.
    ///
    /// A long gap between calls can cross both thresholds at once; the
    /// prompt is still reported before the idle transition.
    pub fn advance(&mut self, now: u64) -> Vec<IdleEvent> {
        let mut events = Vec::new();
        let remaining = self.remaining_ms(now);

        if self.state == IdleState::Active
            && self.prompt_lead_ms > 0
            && remaining <= self.prompt_lead_ms
        {
            debug!("Idle state active -> prompted ({}ms left)", remaining);
            self.state = IdleState::Prompted;
            events.push(IdleEvent::Prompted);
        }

        if self.state != IdleState::Idle && remaining == 0 {
            debug!("Idle state {} -> idle", self.state);
            self.state = IdleState::Idle;
            self.idle_started_at = Some(self.deadline_ms.min(now));
            events.push(IdleEvent::Idle);
        }

        events
    }

    /// Take over a countdown published by another tab.
    ///
    /// `idle_elapsed_ms` is how long the adopted state has already been idle.
    pub fn restore(&mut self, state: IdleState, remaining_ms: u64, idle_elapsed_ms: u64, now: u64) {
        self.state = state;
        match state {
            IdleState::Idle => {
                self.deadline_ms = now;
                self.idle_started_at = Some(now.saturating_sub(idle_elapsed_ms));
            }
            IdleState::Active | IdleState::Prompted => {
                self.deadline_ms = now + remaining_ms.min(self.timeout_ms);
                self.idle_started_at = None;
            }
        }
    }
}
