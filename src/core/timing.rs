//! Tick-Rate Independent Timing
//!
//! A `DeltaTime` tracker measures the time since its previous sample and
//! converts it into a frame-equivalent scalar (`target`): `1.0` means
//! "exactly one nominal tick elapsed". Every speed and cooldown is
//! multiplied by `target` instead of assuming a fixed frame rate.
//!
//! Trackers can be sampled from the wall clock (`update`) or from event
//! timestamps (`advance_to`). The server keeps one tracker for its own
//! tick and one per connected player so a lagging client's buffered input
//! is replayed against that client's clock.

use std::collections::BTreeMap;
use std::time::Instant;

use super::constants::MAX_DELTA;
use crate::game::entity::EntityId;

/// Delta-time tracker.
#[derive(Clone, Debug)]
pub struct DeltaTime {
    epoch: Instant,
    last: Option<f64>,
    tick_rate: f64,
    raw: f64,
    target: f64,
}

impl DeltaTime {
    /// Create a tracker for a nominal tick rate (Hz).
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = f64::from(tick_rate.max(1));
        Self {
            epoch: Instant::now(),
            last: None,
            tick_rate,
            raw: 1.0 / tick_rate,
            target: 1.0,
        }
    }

    /// Tracker pinned to a given frame-equivalent delta.
    pub fn fixed(tick_rate: u32, target: f64) -> Self {
        let mut dt = Self::new(tick_rate);
        dt.target = target;
        dt.raw = target / dt.tick_rate;
        dt
    }

    /// Sample the wall clock.
    pub fn update(&mut self) -> f64 {
        self.update_at(Instant::now())
    }

    /// Sample at a given instant.
    pub fn update_at(&mut self, now: Instant) -> f64 {
        let stamp = now.saturating_duration_since(self.epoch).as_secs_f64();
        self.advance_to(stamp)
    }

    /// Sample at a timestamp in seconds on the tracker's own clock.
    ///
    /// The first sample yields one nominal tick. Raw deltas are clamped to
    /// `[0, MAX_DELTA]` so stale or reordered timestamps cannot produce
    /// negative or runaway movement. Non-finite stamps yield zero.
    pub fn advance_to(&mut self, stamp: f64) -> f64 {
        if !stamp.is_finite() {
            self.raw = 0.0;
            self.target = 0.0;
            return 0.0;
        }
        let raw = match self.last {
            None => 1.0 / self.tick_rate,
            Some(prev) => (stamp - prev).clamp(0.0, MAX_DELTA),
        };
        if self.last.map_or(true, |prev| stamp > prev) {
            self.last = Some(stamp);
        }
        self.raw = raw;
        self.target = raw * self.tick_rate;
        self.target
    }

    /// Last raw delta in seconds.
    #[inline]
    pub fn raw(&self) -> f64 {
        self.raw
    }

    /// Last frame-equivalent delta.
    #[inline]
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Nominal tick rate (Hz).
    #[inline]
    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }
}

/// Key of an independent tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrackerId {
    /// The server's own fixed-rate tick
    Server,
    /// A connected player's catch-up clock
    Player(EntityId),
}

/// Named delta-time trackers.
///
/// Constructed once by whoever owns the simulation and passed by
/// reference; there is no global registry.
#[derive(Debug)]
pub struct DeltaTimeRegistry {
    tick_rate: u32,
    trackers: BTreeMap<TrackerId, DeltaTime>,
}

impl DeltaTimeRegistry {
    /// Create an empty registry.
    pub fn new(tick_rate: u32) -> Self {
        Self { tick_rate, trackers: BTreeMap::new() }
    }

    /// Tracker for `id`, created on first use.
    pub fn get_mut(&mut self, id: TrackerId) -> &mut DeltaTime {
        let tick_rate = self.tick_rate;
        self.trackers.entry(id).or_insert_with(|| DeltaTime::new(tick_rate))
    }

    /// Drop a tracker.
    pub fn remove(&mut self, id: TrackerId) -> Option<DeltaTime> {
        self.trackers.remove(&id)
    }

    /// Number of live trackers.
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// True if no tracker exists.
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_sample_is_nominal() {
        let mut dt = DeltaTime::new(60);
        assert!((dt.advance_to(42.0) - 1.0).abs() < 1e-12);
        assert!((dt.raw() - 1.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_target_scales_with_tick_rate() {
        let mut dt = DeltaTime::new(60);
        dt.advance_to(0.0);
        let target = dt.advance_to(0.05);
        assert!((target - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamps_large_and_negative_deltas() {
        let mut dt = DeltaTime::new(60);
        dt.advance_to(10.0);
        assert!((dt.advance_to(20.0) - MAX_DELTA * 60.0).abs() < 1e-9);
        assert_eq!(dt.advance_to(19.0), 0.0);
        // Clock did not move backwards
        assert!((dt.advance_to(20.1) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_stamp_is_ignored() {
        let mut dt = DeltaTime::new(60);
        dt.advance_to(1.0);
        assert_eq!(dt.advance_to(f64::NAN), 0.0);
        assert!((dt.advance_to(1.1) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_update_at_uses_instants() {
        let mut dt = DeltaTime::new(100);
        let start = Instant::now();
        dt.update_at(start);
        let target = dt.update_at(start + Duration::from_millis(20));
        assert!((target - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_registry_trackers_are_independent() {
        let mut registry = DeltaTimeRegistry::new(60);
        registry.get_mut(TrackerId::Server).advance_to(0.0);
        registry.get_mut(TrackerId::Server).advance_to(0.1);

        let player = registry.get_mut(TrackerId::Player(7));
        assert!((player.advance_to(5.0) - 1.0).abs() < 1e-12);

        assert!((registry.get_mut(TrackerId::Server).target() - 6.0).abs() < 1e-9);
        assert_eq!(registry.len(), 2);
        assert!(registry.remove(TrackerId::Player(7)).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fixed_tracker() {
        let dt = DeltaTime::fixed(60, 2.0);
        assert_eq!(dt.target(), 2.0);
        assert!((dt.raw() - 2.0 / 60.0).abs() < 1e-12);
    }
}
