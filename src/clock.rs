//! Time sources for the engine.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A millisecond clock.
///
/// Claim freshness is compared across tabs, so every tab of a session must
/// read the same time base.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time as Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so several simulated tabs can be
/// driven from one handle.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move time forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time. Moving backwards is allowed to simulate skew.
    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Milliseconds from `earlier` to `later`, clamped at zero when the clock
/// went backwards.
pub fn elapsed_ms(earlier: u64, later: u64) -> u64 {
    later.saturating_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(250);
        assert_eq!(other.now_ms(), 1_250);
    }

    #[test]
    fn elapsed_clamps_backwards_time() {
        assert_eq!(elapsed_ms(5_000, 4_000), 0);
        assert_eq!(elapsed_ms(4_000, 5_000), 1_000);
    }

    #[test]
    fn system_clock_is_epoch_millis() {
        // Anything after 2020-01-01.
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
