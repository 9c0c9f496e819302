//! Kinematic extrapolation of an axis from its last known state.
//!
//! The predictor is pure: it never mutates the state it reads, so calling it
//! twice with the same `(state, now)` pair yields identical results. The sync
//! engine decides whether a prediction is persisted back into the commanded
//! actuals.

use std::time::Instant;

use crate::axis::store::AxisState;

/// Result of extrapolating an axis to a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub position: f32,
    pub velocity: f32,
    pub acceleration: f32,
    /// Velocity expressed in the normalized [-1, 1]-per-half-range units
    /// used at the control boundary
    pub speed: f32,
}

impl Prediction {
    fn hold(state: &AxisState) -> Self {
        Self {
            position: state.position,
            velocity: 0.0,
            acceleration: 0.0,
            speed: 0.0,
        }
    }
}

/// Converts an axis-native velocity into normalized control units.
///
/// `range` is never zero (store invariant), and may be negative for an
/// inverted calibration, which flips the sign of the speed.
pub fn normalized_speed(velocity: f32, range: f32) -> f32 {
    2.0 * velocity / range
}

// Clamp that tolerates inverted bounds; calibration may order min above max
fn clamp_between(value: f32, a: f32, b: f32) -> f32 {
    value.clamp(a.min(b), a.max(b))
}

/// Extrapolates `state` to `now` under constant acceleration and clamps the
/// result to the calibrated envelope.
///
/// The clamp bounds are widened by the tolerance factor `1 + error`, so a
/// jittery link loosens the envelope instead of oscillating against it.
/// Acceleration clamping is the authoritative limiter: the returned velocity
/// is re-integrated from the clamped acceleration rather than taken from the
/// clamped velocity target.
///
/// A zero elapsed time means no update is available yet; the stored position
/// is returned with zero motion.
pub fn predict(state: &AxisState, now: Instant) -> Prediction {
    let dt = now.saturating_duration_since(state.last_update).as_secs_f32();
    if dt <= 0.0 {
        return Prediction::hold(state);
    }

    let tolerance = 1.0 + state.error;

    let target_position =
        state.position + state.velocity * dt + state.acceleration * dt * dt / 2.0;
    let target_position = clamp_between(
        target_position,
        state.min_position * tolerance,
        state.max_position * tolerance,
    );

    let target_velocity = (target_position - state.actual_position) / dt;
    let target_velocity = clamp_between(
        target_velocity,
        state.min_velocity * tolerance,
        state.max_velocity * tolerance,
    );

    let target_acceleration = (target_velocity - state.actual_velocity) / dt;
    let target_acceleration = clamp_between(
        target_acceleration,
        state.min_acceleration * tolerance,
        state.max_acceleration * tolerance,
    );

    let applied_velocity = state.actual_velocity + target_acceleration * dt;

    Prediction {
        position: target_position,
        velocity: applied_velocity,
        acceleration: target_acceleration,
        speed: normalized_speed(applied_velocity, state.range),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::calibration::set_range;
    use crate::axis::store::AxisSource;
    use std::time::Duration;

    fn remote_axis(now: Instant) -> AxisState {
        AxisState::new(AxisSource::Remote, 0.0, now)
    }

    // Axis with bounds wide enough that no clamp engages
    fn unclamped_axis(now: Instant) -> AxisState {
        let mut state = remote_axis(now);
        set_range(&mut state, 0.0, 100.0);
        state.min_velocity = -1000.0;
        state.max_velocity = 1000.0;
        state.min_acceleration = -1000.0;
        state.max_acceleration = 1000.0;
        state
    }

    #[test]
    fn extrapolates_received_motion() {
        let start = Instant::now();
        let mut state = unclamped_axis(start);
        state.position = 50.0;
        state.velocity = 10.0;
        state.actual_position = 50.0;
        state.actual_velocity = 10.0;

        let prediction = predict(&state, start + Duration::from_secs(1));
        assert_eq!(prediction.position, 60.0);
        assert_eq!(prediction.velocity, 10.0);
        assert_eq!(prediction.acceleration, 0.0);
        // 2 * 10 / 100
        assert!((prediction.speed - 0.2).abs() < 1e-6);
    }

    #[test]
    fn velocity_target_clamps_with_tolerance() {
        let start = Instant::now();
        let mut state = remote_axis(start);
        set_range(&mut state, -100.0, 100.0);
        state.min_velocity = -5.0;
        state.max_velocity = 5.0;
        state.min_acceleration = -1000.0;
        state.max_acceleration = 1000.0;
        // Position delta of 7 over 1s asks for 7 units/s
        state.position = 7.0;
        state.actual_position = 0.0;

        let now = start + Duration::from_secs(1);

        let prediction = predict(&state, now);
        // error = 0 -> tolerance 1 -> clamped to 5, re-integration reproduces it
        assert_eq!(prediction.velocity, 5.0);

        state.error = 1.0;
        // tolerance 2 widens the envelope to [-10, 10]; 7 passes through
        let prediction = predict(&state, now);
        assert_eq!(prediction.velocity, 7.0);
    }

    #[test]
    fn widened_velocity_clamp_allows_up_to_tolerance() {
        let start = Instant::now();
        let mut state = remote_axis(start);
        set_range(&mut state, -100.0, 100.0);
        state.min_velocity = -5.0;
        state.max_velocity = 5.0;
        state.min_acceleration = -1000.0;
        state.max_acceleration = 1000.0;
        state.error = 1.0;
        state.position = 20.0;
        state.actual_position = 0.0;

        // Target of 20 units/s clamps at max_velocity * tolerance = 10
        let prediction = predict(&state, start + Duration::from_secs(1));
        assert_eq!(prediction.velocity, 10.0);
    }

    #[test]
    fn acceleration_clamp_limits_applied_velocity() {
        let start = Instant::now();
        let mut state = unclamped_axis(start);
        state.min_acceleration = -2.0;
        state.max_acceleration = 2.0;
        state.position = 50.0;
        state.actual_position = 0.0;
        state.actual_velocity = 0.0;

        // Velocity target of 50 units/s would need 50 units/s^2; only 2 are allowed
        let prediction = predict(&state, start + Duration::from_secs(1));
        assert_eq!(prediction.acceleration, 2.0);
        assert_eq!(prediction.velocity, 2.0);
    }

    #[test]
    fn position_clamps_to_calibrated_envelope() {
        let start = Instant::now();
        let mut state = unclamped_axis(start);
        state.position = 90.0;
        state.velocity = 50.0;
        state.actual_position = 90.0;

        let prediction = predict(&state, start + Duration::from_secs(1));
        assert_eq!(prediction.position, 100.0);
    }

    #[test]
    fn zero_elapsed_time_holds_state() {
        let start = Instant::now();
        let mut state = unclamped_axis(start);
        state.position = 12.0;
        state.velocity = 3.0;

        let prediction = predict(&state, start);
        assert_eq!(prediction.position, 12.0);
        assert_eq!(prediction.velocity, 0.0);
        assert_eq!(prediction.speed, 0.0);
    }

    #[test]
    fn predict_is_idempotent() {
        let start = Instant::now();
        let mut state = unclamped_axis(start);
        state.position = 30.0;
        state.velocity = 4.0;
        state.acceleration = 1.0;
        state.actual_position = 28.0;
        state.actual_velocity = 3.0;
        state.error = 0.25;

        let now = start + Duration::from_millis(500);
        let first = predict(&state, now);
        let second = predict(&state, now);
        assert_eq!(first, second);
    }

    #[test]
    fn inverted_range_flips_normalized_speed() {
        let start = Instant::now();
        let mut state = unclamped_axis(start);
        set_range(&mut state, 100.0, 0.0);
        state.position = 50.0;
        state.velocity = 10.0;
        state.actual_position = 50.0;
        state.actual_velocity = 10.0;

        let prediction = predict(&state, start + Duration::from_secs(1));
        assert!((prediction.speed + 0.2).abs() < 1e-6);
    }
}
