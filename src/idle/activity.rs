//! Raw activity signals coming from the host.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of user input that counts as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    PointerDown,
    KeyDown,
    TouchStart,
    Scroll,
    Wheel,
    PointerMove,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::PointerDown => "pointerdown",
            ActivityKind::KeyDown => "keydown",
            ActivityKind::TouchStart => "touchstart",
            ActivityKind::Scroll => "scroll",
            ActivityKind::Wheel => "wheel",
            ActivityKind::PointerMove => "pointermove",
        }
    }

    /// Kinds enabled when nothing is configured. Pointer moves are too noisy
    /// to count by default.
    pub fn defaults() -> Vec<ActivityKind> {
        vec![
            ActivityKind::PointerDown,
            ActivityKind::KeyDown,
            ActivityKind::TouchStart,
            ActivityKind::Scroll,
            ActivityKind::Wheel,
        ]
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pointerdown" | "mousedown" => Ok(ActivityKind::PointerDown),
            "keydown" => Ok(ActivityKind::KeyDown),
            "touchstart" => Ok(ActivityKind::TouchStart),
            "scroll" => Ok(ActivityKind::Scroll),
            "wheel" => Ok(ActivityKind::Wheel),
            "pointermove" | "mousemove" => Ok(ActivityKind::PointerMove),
            other => Err(format!("unknown activity kind: {}", other)),
        }
    }
}

/// A single raw input signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    /// Milliseconds on the engine clock.
    pub timestamp: u64,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, timestamp: u64) -> Self {
        Self { kind, timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dom_names_and_aliases() {
        assert_eq!("keydown".parse::<ActivityKind>(), Ok(ActivityKind::KeyDown));
        assert_eq!(" Wheel ".parse::<ActivityKind>(), Ok(ActivityKind::Wheel));
        assert_eq!(
            "mousedown".parse::<ActivityKind>(),
            Ok(ActivityKind::PointerDown)
        );
        assert!("resize".parse::<ActivityKind>().is_err());
    }

    #[test]
    fn defaults_leave_out_pointer_moves() {
        let defaults = ActivityKind::defaults();
        assert_eq!(defaults.len(), 5);
        assert!(!defaults.contains(&ActivityKind::PointerMove));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ActivityKind::TouchStart).unwrap();
        assert_eq!(json, "\"touchstart\"");
    }
}
