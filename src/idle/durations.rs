//! Active/idle second counters driven by a fixed one-second tick.

use serde::{Deserialize, Serialize};

/// Counters for one session.
///
/// `idle_secs` counts the current idle episode only and resets when the
/// episode ends; `last_idle_secs` holds the length of the last finished one.
/// `total_idle_secs` keeps growing across episodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationAccumulator {
    pub active_secs: u64,
    pub idle_secs: u64,
    pub last_idle_secs: u64,
    pub total_idle_secs: u64,
}

impl DurationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one elapsed second spent in the given state.
    pub fn tick(&mut self, idle: bool) {
        if idle {
            self.add(0, 1);
        } else {
            self.add(1, 0);
        }
    }

    /// Count several elapsed seconds at once.
    pub fn add(&mut self, active_secs: u64, idle_secs: u64) {
        self.active_secs += active_secs;
        self.idle_secs += idle_secs;
        self.total_idle_secs += idle_secs;
    }

    /// Close the current idle episode, recording `episode_secs` as its
    /// length. Short episodes replace longer ones; zero is a valid length.
    pub fn end_idle_episode(&mut self, episode_secs: u64) {
        self.last_idle_secs = episode_secs;
        self.idle_secs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_split_between_active_and_idle() {
        let mut durations = DurationAccumulator::new();
        for _ in 0..30 {
            durations.tick(false);
        }
        for _ in 0..12 {
            durations.tick(true);
        }
        assert_eq!(durations.active_secs, 30);
        assert_eq!(durations.idle_secs, 12);
        assert_eq!(durations.active_secs + durations.idle_secs, 42);
    }

    #[test]
    fn ending_an_episode_freezes_it() {
        let mut durations = DurationAccumulator::new();
        (0..5).for_each(|_| durations.tick(true));
        durations.end_idle_episode(5);
        assert_eq!(durations.idle_secs, 0);
        assert_eq!(durations.last_idle_secs, 5);

        (0..3).for_each(|_| durations.tick(true));
        durations.end_idle_episode(3);
        assert_eq!(durations.last_idle_secs, 3);
        assert_eq!(durations.total_idle_secs, 8);
    }

    #[test]
    fn short_episode_replaces_longer_one() {
        let mut durations = DurationAccumulator::new();
        (0..15).for_each(|_| durations.tick(true));
        durations.end_idle_episode(15);

        // Idle again for less than one tick.
        durations.end_idle_episode(1);
        assert_eq!(durations.last_idle_secs, 1);
        assert_eq!(durations.idle_secs, 0);
        assert_eq!(durations.total_idle_secs, 15);
    }

    #[test]
    fn bulk_add_matches_ticks() {
        let mut ticked = DurationAccumulator::new();
        (0..30).for_each(|_| ticked.tick(false));
        (0..15).for_each(|_| ticked.tick(true));

        let mut bulk = DurationAccumulator::new();
        bulk.add(30, 15);
        assert_eq!(bulk, ticked);
    }
}
