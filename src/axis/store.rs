use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};

use crate::axis::calibration::{self, DEFAULT_MAX_POSITION, DEFAULT_MIN_POSITION};

// How a locally sampled device axis reports motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalMode {
    /// The sample is a velocity (stick deflection, key axis)
    Rate,
    /// The sample is a displacement increment since the last sample (mouse-like)
    Delta,
}

// Where an axis's ground truth comes from, resolved once at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSource {
    Local(LocalMode),
    Remote,
}

/// Kinematic state of one axis.
///
/// `position`/`velocity`/`acceleration` track the estimate of the physical
/// plant, `actual_position`/`actual_velocity` track what was last commanded
/// back to it. `range` is signed (inverted calibrations are allowed) and is
/// never zero.
#[derive(Debug, Clone)]
pub struct AxisState {
    pub source: AxisSource,

    // Current kinematic estimate, axis-native units
    pub position: f32,
    pub velocity: f32,
    pub acceleration: f32,

    // Calibrated physical bounds
    pub min_position: f32,
    pub max_position: f32,

    // Observed velocity/acceleration extrema, widened monotonically
    pub min_velocity: f32,
    pub max_velocity: f32,
    pub min_acceleration: f32,
    pub max_acceleration: f32,

    // max_position - min_position, substituted with 1.0 when that is zero
    pub range: f32,

    // Normalized discrepancy between the last received position and the
    // local estimate at receipt time
    pub error: f32,

    // Most recent state refresh, basis for extrapolation
    pub last_update: Instant,

    // Last commanded/fed-back values
    pub actual_position: f32,
    pub actual_velocity: f32,

    // Last feedback trajectory sent to the peer, replaced atomically
    pub setpoints: Vec<f32>,
}

impl AxisState {
    pub fn new(source: AxisSource, initial_position: f32, now: Instant) -> Self {
        let mut state = Self {
            source,
            position: initial_position,
            velocity: 0.0,
            acceleration: 0.0,
            min_position: DEFAULT_MIN_POSITION,
            max_position: DEFAULT_MAX_POSITION,
            min_velocity: 0.0,
            max_velocity: 0.0,
            min_acceleration: 0.0,
            max_acceleration: 0.0,
            range: DEFAULT_MAX_POSITION - DEFAULT_MIN_POSITION,
            error: 0.0,
            last_update: now,
            actual_position: 0.0,
            actual_velocity: 0.0,
            setpoints: Vec::new(),
        };

        // Device samples arrive pre-normalized, so local axes start with the
        // unit control range instead of the wide uncalibrated default
        if let AxisSource::Local(_) = source {
            calibration::set_range(&mut state, -1.0, 1.0);
        }

        state
    }
}

/// Unified mapping from axis name to state.
///
/// Replaces the per-device maps probed in sequence: the source of an axis is
/// a tag on its state, fixed at registration. The store is the sole unit of
/// shared mutable data and must only ever be written by one task.
#[derive(Debug, Default)]
pub struct AxisStore {
    axes: HashMap<String, AxisState>,
}

impl AxisStore {
    pub fn new() -> Self {
        Self {
            axes: HashMap::new(),
        }
    }

    pub fn register_local(&mut self, axis_id: &str, mode: LocalMode, initial_position: f32, now: Instant) {
        info!("Registering local axis: {} ({:?})", axis_id, mode);
        self.axes.insert(
            axis_id.to_string(),
            AxisState::new(AxisSource::Local(mode), initial_position, now),
        );
    }

    pub fn register_remote(&mut self, axis_id: &str, initial_position: f32, now: Instant) {
        info!("Registering remote axis: {}", axis_id);
        self.axes.insert(
            axis_id.to_string(),
            AxisState::new(AxisSource::Remote, initial_position, now),
        );
    }

    /// Removes an axis, e.g. when a controller detaches. Unknown names are a
    /// no-op.
    pub fn remove(&mut self, axis_id: &str) -> bool {
        let removed = self.axes.remove(axis_id).is_some();
        if removed {
            info!("Removed axis: {}", axis_id);
        } else {
            debug!("Remove for unknown axis ignored: {}", axis_id);
        }
        removed
    }

    pub fn contains(&self, axis_id: &str) -> bool {
        self.axes.contains_key(axis_id)
    }

    pub fn get(&self, axis_id: &str) -> Option<&AxisState> {
        self.axes.get(axis_id)
    }

    pub fn get_mut(&mut self, axis_id: &str) -> Option<&mut AxisState> {
        self.axes.get_mut(axis_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AxisState)> {
        self.axes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut AxisState)> {
        self.axes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_axis_initial_values() {
        let now = Instant::now();
        let state = AxisState::new(AxisSource::Remote, 42.0, now);
        assert_eq!(state.position, 42.0);
        assert_eq!(state.velocity, 0.0);
        assert_eq!(state.acceleration, 0.0);
        assert_eq!(state.min_position, DEFAULT_MIN_POSITION);
        assert_eq!(state.max_position, DEFAULT_MAX_POSITION);
        assert_eq!(state.range, DEFAULT_MAX_POSITION - DEFAULT_MIN_POSITION);
        assert_eq!(state.error, 0.0);
        assert!(state.setpoints.is_empty());
    }

    #[test]
    fn local_axis_starts_with_unit_range() {
        let state = AxisState::new(AxisSource::Local(LocalMode::Rate), 0.0, Instant::now());
        assert_eq!(state.min_position, -1.0);
        assert_eq!(state.max_position, 1.0);
        assert_eq!(state.range, 2.0);
    }

    #[test]
    fn register_and_remove() {
        let now = Instant::now();
        let mut store = AxisStore::new();
        store.register_local("StickX", LocalMode::Rate, 0.0, now);
        store.register_remote("Elbow", 10.0, now);

        assert_eq!(store.len(), 2);
        assert!(store.contains("Elbow"));
        assert_eq!(store.get("Elbow").unwrap().source, AxisSource::Remote);
        assert_eq!(
            store.get("StickX").unwrap().source,
            AxisSource::Local(LocalMode::Rate)
        );

        assert!(store.remove("Elbow"));
        assert!(!store.remove("Elbow"));
        assert!(!store.contains("Elbow"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reregistration_replaces_state() {
        let now = Instant::now();
        let mut store = AxisStore::new();
        store.register_remote("Elbow", 10.0, now);
        store.get_mut("Elbow").unwrap().velocity = 5.0;

        store.register_remote("Elbow", 20.0, now);
        let state = store.get("Elbow").unwrap();
        assert_eq!(state.position, 20.0);
        assert_eq!(state.velocity, 0.0);
    }
}
