//! Calibration primitives: range mapping and speed auto-ranging.
//!
//! `set_range` maps a raw measured span onto the normalized [-1, 1] control
//! range; `observe_speed` widens the velocity/acceleration envelope from live
//! observation. Both operate on a single `AxisState` so the calibration
//! session and the sync engine can apply them wherever the store lives.

use tracing::debug;

use crate::axis::store::AxisState;

/// Position bounds assumed for an axis that was never calibrated.
pub const DEFAULT_MIN_POSITION: f32 = -1000.0;
pub const DEFAULT_MAX_POSITION: f32 = 1000.0;

/// Sets the calibrated position bounds and recomputes the range.
///
/// The values are honored literally: passing `min > max` produces an
/// inverted axis whose signed range flips normalization. The range is
/// substituted with 1.0 when the bounds coincide, so it is never zero.
pub fn set_range(state: &mut AxisState, min_position: f32, max_position: f32) {
    state.min_position = min_position;
    state.max_position = max_position;
    state.range = if max_position - min_position != 0.0 {
        max_position - min_position
    } else {
        1.0
    };
    debug!(
        "Calibrated range [{}, {}] -> {}",
        min_position, max_position, state.range
    );
}

/// Widens the observed velocity/acceleration extrema from the current state.
///
/// Extrema only ever grow in magnitude; this is a running min/max tracker,
/// not a decaying one.
pub fn observe_speed(state: &mut AxisState) {
    if state.velocity > state.max_velocity {
        state.max_velocity = state.velocity;
    } else if state.velocity < state.min_velocity {
        state.min_velocity = state.velocity;
    }

    if state.acceleration > state.max_acceleration {
        state.max_acceleration = state.acceleration;
    } else if state.acceleration < state.min_acceleration {
        state.min_acceleration = state.acceleration;
    }
}
