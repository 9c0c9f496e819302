//! Operator calibration workflow.
//!
//! The session is the headless counterpart of a calibration screen: it binds
//! a local control axis to a remote motion axis, records the physical bounds
//! the operator sweeps out, keeps the engine's calibrated range current, and
//! relays the integrated displacement as setpoint feedback every tick.
//! Recorded bounds and the binding are persisted per motion axis through the
//! config portal.

pub mod session;

pub use session::{
    CalibrationCommand, CalibrationError, CalibrationHandle, CalibrationSession,
    CalibrationSettings,
};
