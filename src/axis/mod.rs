//! Axis data model and kinematic math.
//!
//! This module holds the per-axis state record, the unified axis store, the
//! kinematic predictor and the calibration primitives. Everything here is
//! plain synchronous code: the store is owned by the sync engine task, which
//! is the only writer, and other tasks observe state through the engine's
//! snapshot broadcasts.

pub mod calibration;
pub mod predictor;
pub mod store;

// Re-exports für einfacheren Zugriff
pub use calibration::{observe_speed, set_range, DEFAULT_MAX_POSITION, DEFAULT_MIN_POSITION};
pub use predictor::{normalized_speed, predict, Prediction};
pub use store::{AxisSource, AxisState, AxisStore, LocalMode};
