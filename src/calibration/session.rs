use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::axis::{DEFAULT_MAX_POSITION, DEFAULT_MIN_POSITION};
use crate::persistence::config_portal::{ConfigPortal, ConfigResult, PortalAction};
use crate::persistence::AxisCalibration;
use crate::sync::{RigSnapshot, SyncCommand};

// Session settings
#[derive(Clone, Debug)]
pub struct CalibrationSettings {
    pub update_interval_ms: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: 50,
        }
    }
}

// Session errors
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Failed to send engine command: {0}")]
    CommandError(String),

    #[error("No control axis bound for {0}")]
    NoControlAxis(String),
}

/// Operator commands accepted by a running session.
#[derive(Debug, Clone)]
pub enum CalibrationCommand {
    /// Bind a control axis to this motion axis and register it remotely
    SetControl { control_axis: String },
    /// Record the current absolute value as the range minimum
    SetMinimum,
    /// Record the current absolute value as the range maximum
    SetMaximum,
    /// Forget the persisted calibration of this motion axis
    Reset,
}

/// Calibration state for one motion axis.
///
/// Tracks the live absolute value of the bound control axis, integrates its
/// speed into a displacement setpoint, and persists recorded bounds through
/// the portal. Recorded bounds are always applied literally — sweeping the
/// maximum below the minimum yields an intentionally inverted axis.
pub struct CalibrationSession {
    // Persistence key of the motion axis being calibrated
    motion_axis_id: String,

    // Remote axis currently bound as the control axis
    control_axis: Option<String>,

    // Recorded calibration bounds
    min_position: f32,
    max_position: f32,

    // Latest absolute value of the control axis
    current_value: f32,

    // Integrated displacement, fed back as the setpoint trajectory
    displacement: f32,

    portal: Arc<ConfigPortal>,
    engine_commands: mpsc::Sender<SyncCommand>,
    snapshots: watch::Receiver<RigSnapshot>,
}

impl CalibrationSession {
    /// Restores the session for a motion axis from its persisted record.
    pub fn new(
        motion_axis_id: &str,
        portal: Arc<ConfigPortal>,
        engine_commands: mpsc::Sender<SyncCommand>,
        snapshots: watch::Receiver<RigSnapshot>,
    ) -> Self {
        let record = match portal
            .execute_portal_action(PortalAction::GetAxisCalibration(motion_axis_id.to_string()))
        {
            ConfigResult::AxisCalibration(record) => record,
            _ => {
                warn!("Could not read calibration for {}, using defaults", motion_axis_id);
                AxisCalibration::default()
            }
        };

        let (min_position, max_position) = record.bounds();
        info!(
            "Calibration session for {}: bounds [{}, {}], control axis {:?}",
            motion_axis_id, min_position, max_position, record.control_axis
        );

        Self {
            motion_axis_id: motion_axis_id.to_string(),
            control_axis: record.control_axis,
            min_position,
            max_position,
            current_value: 0.0,
            displacement: 0.0,
            portal,
            engine_commands,
            snapshots,
        }
    }

    pub fn control_axis(&self) -> Option<&str> {
        self.control_axis.as_deref()
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.min_position, self.max_position)
    }

    pub fn displacement(&self) -> f32 {
        self.displacement
    }

    /// Restores a previously persisted binding at startup.
    pub async fn restore_binding(&mut self) -> Result<(), CalibrationError> {
        let Some(control_axis) = self.control_axis.clone() else {
            debug!("No persisted control axis for {}", self.motion_axis_id);
            return Ok(());
        };

        self.send(SyncCommand::RegisterRemote {
            axis_id: control_axis.clone(),
            initial_position: self.current_value,
        })
        .await?;
        self.apply_range(&control_axis).await
    }

    /// Binds a control axis, registers it with the engine, and persists the
    /// binding.
    pub async fn set_control(&mut self, control_axis: &str) -> Result<(), CalibrationError> {
        info!("Setting control axis for {}: {}", self.motion_axis_id, control_axis);

        self.send(SyncCommand::RegisterRemote {
            axis_id: control_axis.to_string(),
            initial_position: self.current_value,
        })
        .await?;
        self.apply_range(control_axis).await?;

        self.control_axis = Some(control_axis.to_string());
        self.displacement = self.current_value;
        self.persist();
        Ok(())
    }

    /// Records the current absolute value as the range minimum.
    pub async fn set_minimum(&mut self) -> Result<(), CalibrationError> {
        info!(
            "Recording minimum for {}: {}",
            self.motion_axis_id, self.current_value
        );
        self.min_position = self.current_value;
        self.persist();
        self.reapply_range().await
    }

    /// Records the current absolute value as the range maximum.
    pub async fn set_maximum(&mut self) -> Result<(), CalibrationError> {
        info!(
            "Recording maximum for {}: {}",
            self.motion_axis_id, self.current_value
        );
        self.max_position = self.current_value;
        self.persist();
        self.reapply_range().await
    }

    /// Forgets the persisted calibration and falls back to defaults.
    pub async fn reset(&mut self) -> Result<(), CalibrationError> {
        info!("Resetting calibration for {}", self.motion_axis_id);
        self.portal
            .execute_portal_action(PortalAction::DeleteAxisCalibration(
                self.motion_axis_id.clone(),
            ));
        self.min_position = DEFAULT_MIN_POSITION;
        self.max_position = DEFAULT_MAX_POSITION;
        self.reapply_range().await
    }

    /// One session cycle: widen speed extrema, sample the control axis,
    /// integrate displacement, and push it as setpoint feedback.
    pub async fn tick(&mut self, dt: f32) -> Result<(), CalibrationError> {
        let Some(control_axis) = self.control_axis.clone() else {
            return Ok(());
        };

        self.send(SyncCommand::ObserveSpeed {
            axis_id: control_axis.clone(),
        })
        .await?;

        let (position, velocity) = {
            let snapshot = self.snapshots.borrow();
            (
                snapshot.absolute_position(&control_axis),
                snapshot.absolute_speed(&control_axis),
            )
        };

        self.current_value = position;
        self.displacement += velocity * dt;

        // Feedback travels in normalized control units; the engine maps it
        // back into axis-native setpoints with the same calibrated range
        let half_range = self.half_range();
        let normalized_setpoint = (self.displacement - self.min_position) / half_range - 1.0;
        let normalized_speed = velocity / half_range;

        self.send(SyncCommand::SetFeedback {
            axis_id: control_axis,
            speed: normalized_speed,
            setpoints: vec![normalized_setpoint],
        })
        .await
    }

    async fn reapply_range(&mut self) -> Result<(), CalibrationError> {
        match self.control_axis.clone() {
            Some(control_axis) => self.apply_range(&control_axis).await,
            None => Ok(()),
        }
    }

    // Passes the recorded bounds through literally; inverted recordings stay
    // inverted
    async fn apply_range(&mut self, control_axis: &str) -> Result<(), CalibrationError> {
        self.send(SyncCommand::CalibrateRange {
            axis_id: control_axis.to_string(),
            min_position: self.min_position,
            max_position: self.max_position,
        })
        .await
    }

    fn half_range(&self) -> f32 {
        let range = self.max_position - self.min_position;
        let range = if range != 0.0 { range } else { 1.0 };
        range / 2.0
    }

    fn persist(&self) {
        let record = AxisCalibration {
            min_position: Some(self.min_position),
            max_position: Some(self.max_position),
            control_axis: self.control_axis.clone(),
        };
        match self.portal.execute_portal_action(PortalAction::WriteAxisCalibration(
            self.motion_axis_id.clone(),
            record,
        )) {
            ConfigResult::Success => debug!("Calibration for {} persisted", self.motion_axis_id),
            _ => warn!("Failed to persist calibration for {}", self.motion_axis_id),
        }
    }

    async fn send(&self, command: SyncCommand) -> Result<(), CalibrationError> {
        self.engine_commands
            .send(command)
            .await
            .map_err(|e| CalibrationError::CommandError(e.to_string()))
    }
}

/// Handle for a calibration session running in its own task.
pub struct CalibrationHandle {
    command_sender: mpsc::Sender<CalibrationCommand>,
    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl CalibrationHandle {
    pub fn spawn(session: CalibrationSession, settings: Option<CalibrationSettings>) -> Self {
        let settings = settings.unwrap_or_default();
        info!("Spawning calibration session with settings: {:?}", settings);

        let (command_sender, command_receiver) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task_handle = tokio::spawn(async move {
            run_session_loop(session, settings, command_receiver, shutdown_rx).await;
        });

        Self {
            command_sender,
            task_handle: Some(task_handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn commands(&self) -> mpsc::Sender<CalibrationCommand> {
        self.command_sender.clone()
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Calibration session task already terminated");
            }
        }

        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                error!("Calibration session task panicked: {}", e);
            }
        }
    }
}

async fn run_session_loop(
    mut session: CalibrationSession,
    settings: CalibrationSettings,
    mut command_receiver: mpsc::Receiver<CalibrationCommand>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    if let Err(e) = session.restore_binding().await {
        warn!("Failed to restore calibration binding: {}", e);
    }

    let mut interval_timer = tokio::time::interval(tokio::time::Duration::from_millis(
        settings.update_interval_ms,
    ));
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received, leaving calibration loop");
                break;
            }

            command = command_receiver.recv() => {
                let Some(command) = command else {
                    debug!("Calibration command channel closed");
                    break;
                };

                debug!("Applying calibration command: {:?}", command);
                let result = match command {
                    CalibrationCommand::SetControl { control_axis } => {
                        session.set_control(&control_axis).await
                    }
                    CalibrationCommand::SetMinimum => session.set_minimum().await,
                    CalibrationCommand::SetMaximum => session.set_maximum().await,
                    CalibrationCommand::Reset => session.reset().await,
                };
                if let Err(e) = result {
                    error!("Calibration command failed: {}", e);
                }
            }

            _ = interval_timer.tick() => {
                let now = Instant::now();
                let dt = now.saturating_duration_since(last_tick).as_secs_f32();
                last_tick = now;

                if let Err(e) = session.tick(dt).await {
                    error!("Calibration tick failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{AxisSource, AxisState};

    struct Fixture {
        session: CalibrationSession,
        engine_rx: mpsc::Receiver<SyncCommand>,
        snapshot_tx: watch::Sender<RigSnapshot>,
        portal: Arc<ConfigPortal>,
    }

    fn fixture(motion_axis_id: &str) -> Fixture {
        let portal = Arc::new(ConfigPortal::default());
        let (engine_tx, engine_rx) = mpsc::channel(100);
        let (snapshot_tx, snapshot_rx) = watch::channel(RigSnapshot::default());
        let session = CalibrationSession::new(motion_axis_id, portal.clone(), engine_tx, snapshot_rx);
        Fixture {
            session,
            engine_rx,
            snapshot_tx,
            portal,
        }
    }

    fn publish_axis(tx: &watch::Sender<RigSnapshot>, axis_id: &str, position: f32, velocity: f32) {
        let mut state = AxisState::new(AxisSource::Remote, position, Instant::now());
        state.velocity = velocity;
        let mut snapshot = RigSnapshot::default();
        snapshot.axes.insert(axis_id.to_string(), state);
        let _ = tx.send(snapshot);
    }

    fn drain(engine_rx: &mut mpsc::Receiver<SyncCommand>) -> Vec<SyncCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = engine_rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    #[tokio::test]
    async fn set_control_registers_and_persists_binding() {
        let mut fx = fixture("OperatorElbow");
        fx.session.set_control("Elbow").await.unwrap();

        let commands = drain(&mut fx.engine_rx);
        assert!(matches!(
            &commands[0],
            SyncCommand::RegisterRemote { axis_id, .. } if axis_id == "Elbow"
        ));
        assert!(matches!(
            &commands[1],
            SyncCommand::CalibrateRange { axis_id, .. } if axis_id == "Elbow"
        ));

        match fx
            .portal
            .execute_portal_action(PortalAction::GetAxisCalibration("OperatorElbow".to_string()))
        {
            ConfigResult::AxisCalibration(record) => {
                assert_eq!(record.control_axis.as_deref(), Some("Elbow"));
            }
            _ => panic!("unexpected portal result"),
        }
    }

    #[tokio::test]
    async fn recorded_bounds_pass_through_in_sweep_order() {
        let mut fx = fixture("OperatorElbow");
        fx.session.set_control("Elbow").await.unwrap();
        drain(&mut fx.engine_rx);

        // Operator sweeps the high end first, then the low end: the
        // recording stays inverted on purpose
        publish_axis(&fx.snapshot_tx, "Elbow", 120.0, 0.0);
        fx.session.tick(0.05).await.unwrap();
        fx.session.set_minimum().await.unwrap();

        publish_axis(&fx.snapshot_tx, "Elbow", -20.0, 0.0);
        fx.session.tick(0.05).await.unwrap();
        fx.session.set_maximum().await.unwrap();

        assert_eq!(fx.session.bounds(), (120.0, -20.0));

        let commands = drain(&mut fx.engine_rx);
        let last_range = commands
            .iter()
            .rev()
            .find_map(|command| match command {
                SyncCommand::CalibrateRange {
                    min_position,
                    max_position,
                    ..
                } => Some((*min_position, *max_position)),
                _ => None,
            })
            .expect("no range command sent");
        assert_eq!(last_range, (120.0, -20.0));
    }

    #[tokio::test]
    async fn tick_integrates_displacement_and_sends_feedback() {
        let mut fx = fixture("OperatorElbow");
        fx.session.set_control("Elbow").await.unwrap();
        fx.session.set_minimum().await.unwrap(); // records 0.0
        drain(&mut fx.engine_rx);

        // Give the axis a calibrated span of [0, 100]
        publish_axis(&fx.snapshot_tx, "Elbow", 100.0, 0.0);
        fx.session.tick(0.0).await.unwrap();
        fx.session.set_maximum().await.unwrap();
        drain(&mut fx.engine_rx);

        // Axis moving at 10 units/s for one second
        publish_axis(&fx.snapshot_tx, "Elbow", 50.0, 10.0);
        fx.session.tick(1.0).await.unwrap();

        assert!((fx.session.displacement() - 10.0).abs() < 1e-5);

        let commands = drain(&mut fx.engine_rx);
        let feedback = commands
            .iter()
            .find_map(|command| match command {
                SyncCommand::SetFeedback {
                    speed, setpoints, ..
                } => Some((*speed, setpoints.clone())),
                _ => None,
            })
            .expect("no feedback sent");

        // velocity 10 over half-range 50, displacement 10 maps to -0.8
        assert!((feedback.0 - 0.2).abs() < 1e-5);
        assert_eq!(feedback.1.len(), 1);
        assert!((feedback.1[0] + 0.8).abs() < 1e-5);
    }

    #[tokio::test]
    async fn tick_without_binding_is_a_no_op() {
        let mut fx = fixture("OperatorElbow");
        fx.session.tick(0.05).await.unwrap();
        assert!(drain(&mut fx.engine_rx).is_empty());
    }

    #[tokio::test]
    async fn reset_deletes_the_record_and_restores_defaults() {
        let mut fx = fixture("OperatorElbow");
        fx.session.set_control("Elbow").await.unwrap();
        fx.session.set_minimum().await.unwrap();
        fx.session.reset().await.unwrap();

        assert_eq!(fx.session.bounds(), (-1000.0, 1000.0));
        match fx
            .portal
            .execute_portal_action(PortalAction::GetAxisCalibration("OperatorElbow".to_string()))
        {
            ConfigResult::AxisCalibration(record) => assert_eq!(record, AxisCalibration::default()),
            _ => panic!("unexpected portal result"),
        }
    }
}
