//! Local input device layer.
//!
//! Polls gamepads through gilrs and turns configured device axes into named
//! local axis samples for the sync engine. Which device axis feeds which rig
//! axis, and how its values are interpreted (rate or delta), is part of the
//! persisted device configuration.

pub mod collector;

pub use collector::{CollectorError, CollectorHandle, LocalSample};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::axis::LocalMode;

/// Binding of one device axis to a named rig axis.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AxisBinding {
    /// Name the axis is registered under in the store
    pub axis_id: String,
    /// How samples are interpreted when integrating
    pub mode: LocalMode,
}

/// Device layer configuration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    /// Deflection below which stick values are treated as zero
    pub joystick_deadzone: f32,
    /// Device axis name (e.g. "LeftStickX") to rig axis binding
    pub bindings: HashMap<String, AxisBinding>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert(
            "LeftStickX".to_string(),
            AxisBinding {
                axis_id: "Horizontal".to_string(),
                mode: LocalMode::Rate,
            },
        );
        bindings.insert(
            "LeftStickY".to_string(),
            AxisBinding {
                axis_id: "Vertical".to_string(),
                mode: LocalMode::Rate,
            },
        );
        bindings.insert(
            "RightStickX".to_string(),
            AxisBinding {
                axis_id: "Turn".to_string(),
                mode: LocalMode::Rate,
            },
        );
        bindings.insert(
            "RightStickY".to_string(),
            AxisBinding {
                axis_id: "Reach".to_string(),
                mode: LocalMode::Rate,
            },
        );

        Self {
            joystick_deadzone: 0.05,
            bindings,
        }
    }
}
