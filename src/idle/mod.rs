//! Per-tab idle detection: input debouncing, the idle state machine and
//! duration accounting.

mod activity;
mod debounce;
mod durations;
mod machine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use activity::{ActivityEvent, ActivityKind};
pub use debounce::Debouncer;
pub use durations::DurationAccumulator;
pub use machine::IdleStateMachine;

/// User activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    /// User is active; the countdown is above the prompt threshold.
    #[default]
    Active,
    /// Countdown is inside the prompt lead time.
    Prompted,
    /// Countdown reached zero.
    Idle,
}

impl IdleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdleState::Active => "active",
            IdleState::Prompted => "prompted",
            IdleState::Idle => "idle",
        }
    }
}

impl fmt::Display for IdleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IdleState::Active),
            "prompted" => Ok(IdleState::Prompted),
            "idle" => Ok(IdleState::Idle),
            other => Err(format!("unknown idle state: {}", other)),
        }
    }
}

/// A state transition worth telling the host about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IdleEvent {
    /// Entered the prompt window.
    Prompted,
    /// Countdown expired.
    Idle,
    /// Back to active from `Prompted` or `Idle`.
    Active { idle_duration_secs: u64 },
}

impl IdleEvent {
    /// Invoke the matching callback.
    pub fn dispatch(&self, callbacks: &mut dyn IdleCallbacks) {
        match *self {
            IdleEvent::Prompted => callbacks.on_prompt(),
            IdleEvent::Idle => callbacks.on_idle(),
            IdleEvent::Active { idle_duration_secs } => callbacks.on_active(idle_duration_secs),
        }
    }
}

/// Host hooks fired synchronously while the engine handles a tick or event.
///
/// Every tab fires these when its view of the session changes. Work that
/// must happen once per session (calling a logout API, say) belongs behind
/// an `is_leader()` check.
pub trait IdleCallbacks: Send {
    fn on_idle(&mut self) {}

    fn on_active(&mut self, idle_duration_secs: u64) {
        let _ = idle_duration_secs;
    }

    fn on_prompt(&mut self) {}
}
