//! # Persistence Module
//!
//! ## Why This Module Exists
//! The persistence module provides the foundation for OpenRig's configuration
//! management. It defines the data models and infrastructure needed to save,
//! load, and manage rig setups across restarts: calibrated axis bounds, the
//! control-axis bindings chosen by the operator, the link to the motion
//! controller, and the device mapping. Sessions make it possible to keep
//! independent setups for different rigs or operators side by side.
//!
//! ## Key Abstractions
//! - **Session-Based Configuration**: each session is a complete snapshot of
//!   the application state in its own directory
//! - **Modular Configuration Types**: calibration, connection, and device
//!   concerns are separated for independent management
//! - **Type-Safe Serialization**: all configuration uses strongly-typed
//!   structs with serde
//!
//! ## Error Handling Strategy
//! Uses `color_eyre` for rich error context in file operations. Every
//! configuration type provides sensible defaults so the application starts
//! even with missing or corrupted configuration files: a rig with no
//! recorded calibration simply runs on the wide default bounds.

pub mod config_portal;
pub mod persistence_worker;
pub mod session_client;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::axis::{DEFAULT_MAX_POSITION, DEFAULT_MIN_POSITION};
use crate::link::LinkConfig;

/// Persisted calibration record for one motion axis.
///
/// All fields are optional: a key the operator never recorded reads as
/// absent and falls back to the documented defaults.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AxisCalibration {
    /// Recorded minimum of the raw measurement range
    pub min_position: Option<f32>,
    /// Recorded maximum of the raw measurement range
    pub max_position: Option<f32>,
    /// Local control axis bound to this motion axis
    pub control_axis: Option<String>,
}

impl AxisCalibration {
    /// Recorded bounds, falling back to the uncalibrated defaults.
    pub fn bounds(&self) -> (f32, f32) {
        (
            self.min_position.unwrap_or(DEFAULT_MIN_POSITION),
            self.max_position.unwrap_or(DEFAULT_MAX_POSITION),
        )
    }
}

/// Calibration state for the whole rig, keyed by motion axis id.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RigConfig {
    pub axes: HashMap<String, AxisCalibration>,
}

impl RigConfig {
    /// Calibration record for an axis; absent axes read as defaults.
    pub fn axis(&self, motion_axis_id: &str) -> AxisCalibration {
        self.axes.get(motion_axis_id).cloned().unwrap_or_default()
    }
}

/// Configuration of the link to the remote motion controller.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ConnectionConfig {
    pub link: LinkConfig,
}

/// Metadata and state information for a configuration session.
///
/// Contains session management information separate from actual
/// configuration data, so sessions can be listed and switched without
/// loading their full contents.
#[derive(Deserialize, Serialize, Clone, Default, Debug)]
pub struct SessionConfig {
    /// Name of the current session
    pub session_name: String,
    /// Previously active session for fallback scenarios
    pub last_session: Option<String>,
    /// Filesystem path to the session directory
    pub path: PathBuf,
    /// Registry of all known sessions and their paths
    pub available_sessions: HashMap<String, PathBuf>,
}

/// Contents of the top-level main_config.toml.
#[derive(Deserialize, Serialize, Clone, Default, Debug)]
pub struct MainConfig {
    /// Session to restore on the next start
    pub last_session: Option<String>,
}
