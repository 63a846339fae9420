//! Per-fish behavioral classification.
//!
//! Each tracked object carries a bounded position history and three dwell
//! accumulators; [`FishBehaviorTracker::evaluate`] runs the heuristic once
//! per detection using one frame-time as the accumulation unit. States are
//! HEALTHY, SICK and DEAD; DEAD is not terminal and reverts to HEALTHY
//! when the fish leaves the bottom zone.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info};

use crate::annotator::{BoundingBox, Detection};

/// Seconds dwelling in the bottom zone (moving or not) before SICK.
const SINKING_SICK_SECS: f64 = 5.0;
/// Seconds dwelling above the top-zone line before SICK.
const SURFACE_SICK_SECS: f64 = 5.0;
/// Window, in seconds, over which position spread is measured.
const STILLNESS_WINDOW_SECS: f64 = 3.0;
/// Minimum history samples before the stillness check is meaningful.
const MIN_STILLNESS_SAMPLES: usize = 5;

/// Which camera a fish was observed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Top,
    Side,
}

/// Behavioral classification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FishState {
    Healthy,
    Sick,
    Dead,
}

impl FishState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FishState::Healthy => "HEALTHY",
            FishState::Sick => "SICK",
            FishState::Dead => "DEAD",
        }
    }
}

/// Thresholds and geometry for the behavior heuristic.
///
/// Immutable for the process lifetime; shared read-only by every tracker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Frame width in pixels at the annotator's working resolution.
    pub frame_width: f64,
    /// Frame height in pixels at the annotator's working resolution.
    pub frame_height: f64,
    /// Detection cadence in frames per second.
    pub frame_rate: f64,
    /// Position history horizon in seconds.
    pub memory_secs: f64,
    /// Position spread (std dev, pixels) below which a fish is stationary.
    pub dead_velocity_threshold: f64,
    /// Continuous stationary bottom-zone seconds before DEAD.
    pub dead_time_threshold: f64,
    /// Fraction of frame height above which a fish is "at the surface".
    pub top_zone: f64,
    /// Fraction of frame height below which a fish is "on the bottom".
    pub bottom_zone: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            frame_width: 960.0,
            frame_height: 720.0,
            frame_rate: 30.0,
            memory_secs: 10.0,
            dead_velocity_threshold: 2.0,
            dead_time_threshold: 10.0,
            top_zone: 0.15,
            bottom_zone: 0.8,
        }
    }
}

impl BehaviorConfig {
    fn history_capacity(&self) -> usize {
        ((self.frame_rate * self.memory_secs) as usize).max(1)
    }
}

/// State machine for one tracked fish.
pub struct FishBehaviorTracker {
    track_id: u64,
    view: ViewKind,
    config: Arc<BehaviorConfig>,
    positions: VecDeque<(f64, f64)>,
    last_seen: Instant,
    detected_class: Option<u32>,
    state: FishState,
    time_in_top_zone: f64,
    time_in_bottom_zone: f64,
    time_sinking: f64,
}

impl FishBehaviorTracker {
    pub fn new(track_id: u64, view: ViewKind, config: Arc<BehaviorConfig>) -> Self {
        let capacity = config.history_capacity();
        Self {
            track_id,
            view,
            config,
            positions: VecDeque::with_capacity(capacity),
            last_seen: Instant::now(),
            detected_class: None,
            state: FishState::Healthy,
            time_in_top_zone: 0.0,
            time_in_bottom_zone: 0.0,
            time_sinking: 0.0,
        }
    }

    /// Record one detection: append the box center to the history,
    /// refresh last-seen, keep the class label if one was reported.
    pub fn update(&mut self, bbox: &BoundingBox, class_id: Option<u32>) {
        self.last_seen = Instant::now();
        if self.positions.len() == self.config.history_capacity() {
            self.positions.pop_front();
        }
        self.positions.push_back(bbox.center());
        if class_id.is_some() {
            self.detected_class = class_id;
        }
    }

    /// Run the behavior heuristic once for the latest position.
    ///
    /// The bottom-zone dwell accumulator persists across ticks while the
    /// fish stays stationary in the zone, and resets when motion resumes
    /// or the zone is left.
    pub fn evaluate(&mut self) {
        let Some(&(_, current_y)) = self.positions.back() else {
            return;
        };
        let cfg = &self.config;
        let tick = 1.0 / cfg.frame_rate;
        let previous = self.state;

        if current_y > cfg.frame_height * cfg.bottom_zone {
            self.time_sinking += tick;

            if self.positions.len() > MIN_STILLNESS_SAMPLES && self.state != FishState::Dead {
                if self.is_stationary() {
                    self.time_in_bottom_zone += tick;
                } else {
                    self.time_in_bottom_zone = 0.0;
                }
                if self.time_in_bottom_zone > cfg.dead_time_threshold {
                    self.state = FishState::Dead;
                }
            }

            if self.time_sinking > SINKING_SICK_SECS
                && !matches!(self.state, FishState::Dead | FishState::Sick)
            {
                self.state = FishState::Sick;
            }
        } else {
            self.time_in_bottom_zone = 0.0;
            self.time_sinking = 0.0;
            if self.state == FishState::Dead {
                self.state = FishState::Healthy;
            }
        }

        if self.state != FishState::Dead {
            if current_y < cfg.frame_height * cfg.top_zone {
                self.time_in_top_zone += tick;
                if self.time_in_top_zone > SURFACE_SICK_SECS && self.state != FishState::Sick {
                    self.state = FishState::Sick;
                }
            } else {
                self.time_in_top_zone = 0.0;
            }
        }

        if !matches!(self.state, FishState::Dead | FishState::Sick) {
            self.state = FishState::Healthy;
        }

        if self.state != previous {
            info!(
                track_id = self.track_id,
                view = ?self.view,
                "fish {} -> {}",
                previous.as_str(),
                self.state.as_str()
            );
        }
    }

    /// Position spread over the recent window is below the velocity
    /// threshold on both axes.
    fn is_stationary(&self) -> bool {
        let window = ((self.config.frame_rate * STILLNESS_WINDOW_SECS) as usize).max(1);
        let start = self.positions.len().saturating_sub(window);
        let recent: Vec<(f64, f64)> = self.positions.iter().skip(start).copied().collect();

        let std_x = std_dev(recent.iter().map(|p| p.0));
        let std_y = std_dev(recent.iter().map(|p| p.1));
        std_x < self.config.dead_velocity_threshold && std_y < self.config.dead_velocity_threshold
    }

    pub fn state(&self) -> FishState {
        self.state
    }

    /// Label suffix for the annotator's overlay, present when not healthy.
    pub fn state_suffix(&self) -> Option<&'static str> {
        match self.state {
            FishState::Healthy => None,
            other => Some(other.as_str()),
        }
    }

    pub fn track_id(&self) -> u64 {
        self.track_id
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn detected_class(&self) -> Option<u32> {
        self.detected_class
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn history_len(&self) -> usize {
        self.positions.len()
    }
}

/// Population standard deviation.
fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

/// Table of trackers keyed by tracked-object id.
///
/// Mutated only through its lock-guarded interface; safe to call from a
/// concurrently running annotator callback.
pub struct TrackerTable {
    config: Arc<BehaviorConfig>,
    trackers: Mutex<HashMap<u64, FishBehaviorTracker>>,
}

impl TrackerTable {
    pub fn new(config: Arc<BehaviorConfig>) -> Self {
        Self {
            config,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one detection through its tracker, creating the tracker on
    /// first sight of the id. Returns the state after evaluation.
    pub fn observe(&self, view: ViewKind, detection: &Detection) -> FishState {
        let mut trackers = self.trackers.lock().unwrap();
        let tracker = trackers.entry(detection.track_id).or_insert_with(|| {
            debug!(track_id = detection.track_id, ?view, "new fish tracked");
            FishBehaviorTracker::new(detection.track_id, view, self.config.clone())
        });
        tracker.update(&detection.bbox, detection.class_id);
        tracker.evaluate();
        tracker.state()
    }

    pub fn state_of(&self, track_id: u64) -> Option<FishState> {
        self.trackers.lock().unwrap().get(&track_id).map(|t| t.state())
    }

    pub fn len(&self) -> usize {
        self.trackers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop trackers not updated within `max_age`. Returns how many went.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let mut trackers = self.trackers.lock().unwrap();
        let before = trackers.len();
        trackers.retain(|_, t| t.last_seen.elapsed() <= max_age);
        let evicted = before - trackers.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale fish trackers");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Config matching the reference scenario: 10 fps, 100 px tall frame,
    /// bottom zone at y > 80, dead after 2 s of stillness.
    fn scenario_config() -> Arc<BehaviorConfig> {
        Arc::new(BehaviorConfig {
            frame_width: 100.0,
            frame_height: 100.0,
            frame_rate: 10.0,
            memory_secs: 10.0,
            dead_velocity_threshold: 1.0,
            dead_time_threshold: 2.0,
            top_zone: 0.15,
            bottom_zone: 0.8,
        })
    }

    fn jitter(i: usize) -> f64 {
        // deterministic sub-pixel wiggle, well below the 1.0 threshold
        0.2 * ((i % 3) as f64 - 1.0)
    }

    fn feed(tracker: &mut FishBehaviorTracker, n: usize, x: f64, y: f64, wiggle: f64) {
        for i in 0..n {
            let dx = wiggle * ((i % 3) as f64 - 1.0);
            let bbox = BoundingBox::new(x + dx - 5.0, y + dx - 5.0, 10.0, 10.0);
            tracker.update(&bbox, None);
            tracker.evaluate();
        }
    }

    #[test]
    fn test_stationary_fish_on_bottom_dies() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Side, scenario_config());
        for i in 0..30 {
            let bbox = BoundingBox::new(50.0 + jitter(i) - 5.0, 90.0 + jitter(i) - 5.0, 10.0, 10.0);
            tracker.update(&bbox, None);
            tracker.evaluate();
        }
        // 2.0 s threshold at 10 fps: dead well within 30 updates
        assert_eq!(tracker.state(), FishState::Dead);
    }

    #[test]
    fn test_dwell_accumulator_freezes_once_dead() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Side, scenario_config());
        feed(&mut tracker, 30, 50.0, 90.0, 0.2);
        assert_eq!(tracker.state(), FishState::Dead);
        let dwell = tracker.time_in_bottom_zone;
        feed(&mut tracker, 50, 50.0, 90.0, 0.2);
        assert_eq!(tracker.state(), FishState::Dead);
        assert_relative_eq!(tracker.time_in_bottom_zone, dwell);
    }

    #[test]
    fn test_dead_reverts_to_healthy_on_leaving_bottom() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Side, scenario_config());
        feed(&mut tracker, 30, 50.0, 90.0, 0.2);
        assert_eq!(tracker.state(), FishState::Dead);

        // rises above the bottom zone line
        feed(&mut tracker, 1, 50.0, 50.0, 0.0);
        assert_eq!(tracker.state(), FishState::Healthy);
    }

    #[test]
    fn test_leaving_bottom_before_threshold_resets_dwell() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Side, scenario_config());
        // 15 still updates: dwell ~1.0s, below the 2.0s threshold
        feed(&mut tracker, 15, 50.0, 90.0, 0.2);
        assert_eq!(tracker.state(), FishState::Healthy);
        assert!(tracker.time_in_bottom_zone > 0.0);
        // rising above the zone line zeroes the accumulator
        feed(&mut tracker, 5, 50.0, 50.0, 0.2);
        assert_relative_eq!(tracker.time_in_bottom_zone, 0.0);
        // returning does not inherit the earlier dwell
        feed(&mut tracker, 15, 50.0, 90.0, 0.2);
        assert_eq!(tracker.state(), FishState::Healthy);
    }

    #[test]
    fn test_moving_fish_on_bottom_never_dies() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Side, scenario_config());
        for i in 0..100 {
            // +/- 10 px swings: std well above the 1.0 threshold
            let sway = if i % 2 == 0 { 10.0 } else { -10.0 };
            let bbox = BoundingBox::new(50.0 + sway - 5.0, 90.0 - 5.0, 10.0, 10.0);
            tracker.update(&bbox, None);
            tracker.evaluate();
        }
        assert_ne!(tracker.state(), FishState::Dead);
        // lingering on the bottom that long still marks it sick
        assert_eq!(tracker.state(), FishState::Sick);
    }

    #[test]
    fn test_surface_dwell_marks_sick() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Top, scenario_config());
        // y=10 < 15 (top-zone line); > 5s at 10 fps
        feed(&mut tracker, 60, 50.0, 10.0, 0.0);
        assert_eq!(tracker.state(), FishState::Sick);
    }

    #[test]
    fn test_mid_water_fish_stays_healthy() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Top, scenario_config());
        feed(&mut tracker, 200, 50.0, 50.0, 3.0);
        assert_eq!(tracker.state(), FishState::Healthy);
        assert!(tracker.state_suffix().is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let config = scenario_config();
        let capacity = config.history_capacity();
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Top, config);
        feed(&mut tracker, capacity + 50, 50.0, 50.0, 0.0);
        assert_eq!(tracker.history_len(), capacity);
    }

    #[test]
    fn test_class_label_is_retained() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Top, scenario_config());
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        tracker.update(&bbox, Some(3));
        tracker.update(&bbox, None);
        assert_eq!(tracker.detected_class(), Some(3));
    }

    #[test]
    fn test_state_suffix() {
        let mut tracker = FishBehaviorTracker::new(1, ViewKind::Side, scenario_config());
        assert!(tracker.state_suffix().is_none());
        feed(&mut tracker, 30, 50.0, 90.0, 0.2);
        assert_eq!(tracker.state_suffix(), Some("DEAD"));
    }

    #[test]
    fn test_std_dev() {
        assert_relative_eq!(std_dev([2.0, 2.0, 2.0].into_iter()), 0.0);
        assert_relative_eq!(std_dev([1.0, 3.0].into_iter()), 1.0);
        assert_relative_eq!(std_dev(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_table_creates_on_first_sight() {
        let table = TrackerTable::new(scenario_config());
        let detection = Detection {
            track_id: 7,
            class_id: Some(0),
            bbox: BoundingBox::new(45.0, 45.0, 10.0, 10.0),
        };
        assert!(table.state_of(7).is_none());
        let state = table.observe(ViewKind::Top, &detection);
        assert_eq!(state, FishState::Healthy);
        assert_eq!(table.len(), 1);
        assert_eq!(table.state_of(7), Some(FishState::Healthy));
    }

    #[test]
    fn test_table_eviction() {
        let table = TrackerTable::new(scenario_config());
        let detection = Detection {
            track_id: 7,
            class_id: None,
            bbox: BoundingBox::new(45.0, 45.0, 10.0, 10.0),
        };
        table.observe(ViewKind::Top, &detection);
        assert_eq!(table.evict_stale(Duration::from_secs(60)), 0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.evict_stale(Duration::ZERO), 1);
        assert!(table.is_empty());
    }
}
