use chrono::{DateTime, Local};
use gilrs::{Axis, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::device::DeviceConfig;

// One sampled value of a locally driven axis
#[derive(Debug, Clone)]
pub struct LocalSample {
    pub axis_id: String,
    pub value: f32,
    pub timestamp: DateTime<Local>,
}

impl LocalSample {
    pub fn new(axis_id: &str, value: f32) -> Self {
        Self {
            axis_id: axis_id.to_string(),
            value,
            timestamp: Local::now(),
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send sample: {0}")]
    SampleSendError(String),
}

// Define collector states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
pub struct DeviceCollector<S: CollectionState> {
    // Gilrs context
    gilrs: Gilrs,

    // Active gamepad
    active_gamepad: Option<GamepadId>,

    // Device configuration (deadzone + axis bindings)
    config: DeviceConfig,

    // Channel for sending samples to the sync engine
    sample_sender: mpsc::Sender<LocalSample>,
}

// Implementation for Initializing state
impl DeviceCollector<Initializing> {
    pub fn create(
        config: DeviceConfig,
        sample_sender: mpsc::Sender<LocalSample>,
    ) -> Result<Self, CollectorError> {
        debug!("Creating device collector with config: {:?}", config);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(gilrs, None, config, sample_sender))
    }

    // Pick a gamepad and transition to Collecting state
    pub fn initialize(mut self) -> Result<DeviceCollector<Collecting>, CollectorError> {
        info!(
            "Initializing device collector with deadzone: {}",
            self.config.joystick_deadzone
        );

        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, continuing in idle mode");
        } else {
            info!("Found {} gamepads:", gamepads.len());
            for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                info!("  [{}] ID: {}, Name: {}", idx, id, gamepad.name());
            }

            let (id, gamepad) = &gamepads[0];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        info!("Device collector initialized, transitioning to Collecting state");
        Ok(self.transition())
    }
}

// Implementation for Collecting state
impl DeviceCollector<Collecting> {
    // Collect a single event and forward it as a sample
    pub fn collect_next_event(&mut self) -> Result<(), CollectorError> {
        if let Some(Event { id, event, time, .. }) = self.gilrs.next_event() {
            if let Some(active_id) = self.active_gamepad {
                if id != active_id {
                    debug!("Skipping event from non-active gamepad: {:?}", id);
                    return Ok(());
                }
            }

            debug!("Processing gilrs event: {:?} at time: {:?}", event, time);

            if let Some(sample) = self.convert_gilrs_event(event) {
                debug!("Captured sample: {:?}", sample);
                match self.sample_sender.try_send(sample) {
                    Ok(_) => debug!("Sample sent to sync engine"),
                    Err(e) => {
                        error!("Failed to send sample to sync engine: {}", e);
                        return Err(CollectorError::SampleSendError(e.to_string()));
                    }
                }
            }
        }

        Ok(())
    }

    /// Runs the collection loop until the task is cancelled.
    ///
    /// The gilrs poll is non-blocking; the short async sleep keeps the task
    /// cancellable and the CPU idle between events.
    pub async fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting device collection loop");

        let mut sample_count = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(30);

        loop {
            if let Err(e) = self.collect_next_event() {
                error!("Error collecting event: {}", e);
                // Continue despite errors to maintain the loop
            } else {
                sample_count += 1;
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                info!(
                    "Device collector stats: {} polls in last {} seconds",
                    sample_count,
                    log_interval.num_seconds()
                );
                sample_count = 0;
                last_log_time = now;
            }

            tokio::time::sleep(std::time::Duration::from_micros(500)).await;
        }
    }

    // Convert a gilrs event into a named local axis sample
    fn convert_gilrs_event(&mut self, event: EventType) -> Option<LocalSample> {
        match event {
            EventType::AxisChanged(axis, value, _) => {
                let device_axis = device_axis_name(axis)?;

                let binding = match self.config.bindings.get(device_axis) {
                    Some(binding) => binding,
                    None => {
                        debug!("No binding for device axis: {}", device_axis);
                        return None;
                    }
                };

                let value = apply_deadzone(value, self.config.joystick_deadzone);
                debug!("{} -> {}: {:.4}", device_axis, binding.axis_id, value);

                Some(LocalSample::new(&binding.axis_id, value))
            }
            EventType::Connected => {
                info!("Controller connected event detected");
                None
            }
            EventType::Disconnected => {
                warn!("Controller disconnected event detected");
                None
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                None
            }
        }
    }
}

// Public interface for spawning and running the collector
pub struct CollectorHandle {
    sample_sender: mpsc::Sender<LocalSample>,
}

impl CollectorHandle {
    // Create a new collector and spawn it as a tokio task
    pub fn spawn(
        config: DeviceConfig,
        sample_sender: mpsc::Sender<LocalSample>,
    ) -> Result<Self, CollectorError> {
        info!("Spawning device collector");

        let sender_clone = sample_sender.clone();
        let collector = DeviceCollector::create(config, sample_sender)?;

        tokio::spawn(async move {
            match collector.initialize() {
                Ok(mut collecting_state) => {
                    info!("Device collector initialization successful, starting collection loop");
                    if let Err(e) = collecting_state.run_collection_loop().await {
                        error!("Collector task terminated with error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to initialize device collector: {}", e);
                }
            }
        });

        info!("Device collector successfully started");
        Ok(Self {
            sample_sender: sender_clone,
        })
    }

    // Get a sender for local samples
    pub fn sample_sender(&self) -> mpsc::Sender<LocalSample> {
        self.sample_sender.clone()
    }
}

// Canonical name of a gilrs axis, used as the binding key
fn device_axis_name(axis: Axis) -> Option<&'static str> {
    match axis {
        Axis::LeftStickX => Some("LeftStickX"),
        Axis::LeftStickY => Some("LeftStickY"),
        Axis::RightStickX => Some("RightStickX"),
        Axis::RightStickY => Some("RightStickY"),
        Axis::LeftZ => Some("LeftZ"),
        Axis::RightZ => Some("RightZ"),
        Axis::DPadX => Some("DPadX"),
        Axis::DPadY => Some("DPadY"),
        _ => None,
    }
}

// Helper function to apply deadzone to analog stick values
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        // Rescale the value to the range outside the deadzone
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}
