//! Coalesces bursts of raw input into activity pulses.
//!
//! The first event of a quiet period pulses immediately. Events that arrive
//! while a window is open are held back, and a single trailing pulse fires
//! once the burst has been quiet for the full window. Pulses are therefore
//! never closer together than the window.

use crate::clock::elapsed_ms;

#[derive(Debug, Clone, Default)]
pub struct Debouncer {
    /// Window length; zero means pass-through.
    interval_ms: u64,
    /// When the last pulse was released.
    last_pulse_at: Option<u64>,
    /// Timestamp of the newest held-back event.
    pending_since: Option<u64>,
}

impl Debouncer {
    /// Create a debouncer. Zero or negative windows pass every event through.
    pub fn new(debounce_ms: i64) -> Self {
        Self {
            interval_ms: debounce_ms.max(0) as u64,
            last_pulse_at: None,
            pending_since: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Record a raw event at `at`. Returns the pulse time if one fires now.
    pub fn submit(&mut self, at: u64) -> Option<u64> {
        if self.interval_ms == 0 {
            self.last_pulse_at = Some(at);
            return Some(at);
        }

        let window_open = self
            .last_pulse_at
            .is_some_and(|last| elapsed_ms(last, at) < self.interval_ms);

        if self.pending_since.is_none() && !window_open {
            self.last_pulse_at = Some(at);
            return Some(at);
        }

        self.pending_since = Some(at);
        None
    }

    /// Release the trailing pulse if its burst has gone quiet.
    pub fn poll(&mut self, now: u64) -> Option<u64> {
        let last = self.pending_since?;
        if elapsed_ms(last, now) >= self.interval_ms {
            self.pending_since = None;
            self.last_pulse_at = Some(now);
            Some(now)
        } else {
            None
        }
    }

    /// When the held-back pulse becomes due, if one is held.
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending_since.map(|last| last + self.interval_ms)
    }

    pub fn has_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Drop any held-back pulse.
    pub fn cancel(&mut self) {
        self.pending_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_pulses_immediately() {
        let mut debouncer = Debouncer::new(500);
        assert_eq!(debouncer.submit(1_000), Some(1_000));
        assert!(!debouncer.has_pending());
    }

    #[test]
    fn burst_collapses_into_one_trailing_pulse() {
        let mut debouncer = Debouncer::new(500);
        assert_eq!(debouncer.submit(1_000), Some(1_000));
        assert_eq!(debouncer.submit(1_100), None);
        assert_eq!(debouncer.submit(1_200), None);
        assert_eq!(debouncer.submit(1_300), None);

        assert_eq!(debouncer.next_deadline(), Some(1_800));
        assert_eq!(debouncer.poll(1_700), None);
        assert_eq!(debouncer.poll(1_800), Some(1_800));
        assert_eq!(debouncer.poll(5_000), None);
    }

    #[test]
    fn trailing_pulse_waits_for_the_last_event() {
        let mut debouncer = Debouncer::new(500);
        debouncer.submit(0);
        debouncer.submit(100);
        assert_eq!(debouncer.poll(550), None);
        debouncer.submit(550);
        assert_eq!(debouncer.poll(1_000), None);
        assert_eq!(debouncer.poll(1_050), Some(1_050));
    }

    #[test]
    fn event_inside_window_after_pulse_is_held() {
        let mut debouncer = Debouncer::new(500);
        debouncer.submit(0);
        assert_eq!(debouncer.submit(200), None);
        assert_eq!(debouncer.poll(700), Some(700));
        // Window reopened at 700.
        assert_eq!(debouncer.submit(900), None);
        assert_eq!(debouncer.submit(1_300), None);
        assert_eq!(debouncer.poll(1_800), Some(1_800));
        assert_eq!(debouncer.submit(2_400), Some(2_400));
    }

    #[test]
    fn zero_and_negative_windows_pass_through() {
        for window in [0, -250] {
            let mut debouncer = Debouncer::new(window);
            assert_eq!(debouncer.submit(10), Some(10));
            assert_eq!(debouncer.submit(11), Some(11));
            assert_eq!(debouncer.submit(11), Some(11));
            assert!(!debouncer.has_pending());
        }
    }

    #[test]
    fn cancel_drops_held_pulse() {
        let mut debouncer = Debouncer::new(500);
        debouncer.submit(0);
        debouncer.submit(100);
        debouncer.cancel();
        assert_eq!(debouncer.poll(10_000), None);
    }
}
