use chrono::Local;
use statum::{machine, state};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::axis::{calibration, predictor, AxisSource, AxisState, AxisStore, LocalMode};
use crate::device::collector::LocalSample;
use crate::link::{codec, AxisLink};

// Engine settings
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub tick_interval_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
        }
    }
}

// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to initialize sync engine: {0}")]
    InitializationError(String),

    #[error("Command channel closed")]
    ChannelClosed,

    #[error("Link error: {0}")]
    LinkError(#[from] crate::link::LinkError),

    #[error("Engine task panicked: {0}")]
    TaskError(String),
}

/// Commands accepted by the engine between ticks.
///
/// Everything that mutates axis state funnels through this channel so the
/// engine task stays the single writer.
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Register an axis actuated by the remote controller
    RegisterRemote { axis_id: String, initial_position: f32 },
    /// Register a locally sampled device axis
    RegisterLocal {
        axis_id: String,
        mode: LocalMode,
        initial_position: f32,
    },
    /// Drop an axis, e.g. when its controller detaches
    RemoveAxis { axis_id: String },
    /// Apply calibrated position bounds
    CalibrateRange {
        axis_id: String,
        min_position: f32,
        max_position: f32,
    },
    /// Fold the axis's current motion into its observed extrema
    ObserveSpeed { axis_id: String },
    /// Store the feedback trajectory for an axis; `speed` and the setpoints
    /// are in normalized control units
    SetFeedback {
        axis_id: String,
        speed: f32,
        setpoints: Vec<f32>,
    },
}

/// Consistent copy of all axis state, broadcast once per tick.
///
/// Consumers run the predictor against their copy with their own clock, so
/// reads never touch the live store.
#[derive(Debug, Clone, Default)]
pub struct RigSnapshot {
    pub axes: HashMap<String, AxisState>,
}

impl RigSnapshot {
    /// Normalized speed of an axis; unknown axes read as 0.0.
    pub fn axis_speed(&self, axis_id: &str, now: Instant) -> f32 {
        match self.axes.get(axis_id) {
            Some(state) => match state.source {
                AxisSource::Local(_) => predictor::normalized_speed(state.velocity, state.range),
                AxisSource::Remote => predictor::predict(state, now).speed,
            },
            None => 0.0,
        }
    }

    /// Axis-native position estimate; unknown axes read as 0.0.
    pub fn absolute_position(&self, axis_id: &str) -> f32 {
        self.axes.get(axis_id).map(|s| s.position).unwrap_or(0.0)
    }

    /// Axis-native velocity estimate; unknown axes read as 0.0.
    pub fn absolute_speed(&self, axis_id: &str) -> f32 {
        self.axes.get(axis_id).map(|s| s.velocity).unwrap_or(0.0)
    }
}

/// One received batch string, carried into the Ingesting state.
#[derive(Debug, Clone)]
pub struct ReportBatch {
    pub payload: String,
}

// Define engine states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum SyncState {
    Waiting,
    Ingesting(ReportBatch),
    Publishing,
}

#[machine]
pub struct SyncEngine<S: SyncState> {
    // Engine settings
    settings: SyncSettings,

    // The one unit of shared mutable data; this task is its only writer
    store: AxisStore,

    // Channel to the remote rig controller
    link: Box<dyn AxisLink>,

    // Receiver for state-mutating commands
    command_receiver: mpsc::Receiver<SyncCommand>,

    // Receiver for local device samples
    sample_receiver: mpsc::Receiver<LocalSample>,

    // Watch channel sender for snapshots
    snapshot_sender: watch::Sender<RigSnapshot>,

    // Latest rate sample per local axis; sticks report only on change, so
    // the last deflection stays authoritative between events
    rate_samples: HashMap<String, f32>,

    // Displacement increments accumulated since the last tick
    delta_accum: HashMap<String, f32>,

    // Remote axes that received a valid report this cycle
    updated_axes: Vec<String>,

    // Time of the current cycle and of the previous one
    cycle_time: Instant,
    last_tick: Instant,

    // Running report statistics for the loop log
    stat_reports: u64,
    stat_decode_errors: u64,
}

// Implementation of methods available in all states
impl<S: SyncState> SyncEngine<S> {
    pub fn subscribe(&self) -> watch::Receiver<RigSnapshot> {
        self.snapshot_sender.subscribe()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn report_stats(&self) -> (u64, u64) {
        (self.stat_reports, self.stat_decode_errors)
    }

    fn apply_command(&mut self, command: SyncCommand) {
        let now = self.cycle_time;
        match command {
            SyncCommand::RegisterRemote {
                axis_id,
                initial_position,
            } => {
                self.store.register_remote(&axis_id, initial_position, now);
            }
            SyncCommand::RegisterLocal {
                axis_id,
                mode,
                initial_position,
            } => {
                self.store
                    .register_local(&axis_id, mode, initial_position, now);
            }
            SyncCommand::RemoveAxis { axis_id } => {
                self.store.remove(&axis_id);
                self.rate_samples.remove(&axis_id);
                self.delta_accum.remove(&axis_id);
            }
            SyncCommand::CalibrateRange {
                axis_id,
                min_position,
                max_position,
            } => match self.store.get_mut(&axis_id) {
                Some(state) => calibration::set_range(state, min_position, max_position),
                None => debug!("Calibration for unknown axis ignored: {}", axis_id),
            },
            SyncCommand::ObserveSpeed { axis_id } => {
                if let Some(state) = self.store.get_mut(&axis_id) {
                    calibration::observe_speed(state);
                }
            }
            SyncCommand::SetFeedback {
                axis_id,
                speed,
                setpoints,
            } => match self.store.get_mut(&axis_id) {
                Some(state) => {
                    // Undo the control-range normalization
                    state.actual_velocity = speed * state.range / 2.0;

                    let half_range = state.range / 2.0;
                    let min_position = state.min_position;
                    state.setpoints.clear();
                    state
                        .setpoints
                        .extend(setpoints.iter().map(|sp| (sp + 1.0) * half_range + min_position));

                    if let Some(first) = state.setpoints.first() {
                        state.actual_position = *first;
                    }

                    debug!(
                        "New setpoints for {}: {:?} -> {:?}",
                        axis_id, setpoints, state.setpoints
                    );
                }
                None => debug!("Feedback for unknown axis ignored: {}", axis_id),
            },
        }
    }
}

// Implementation for Waiting state
impl SyncEngine<Waiting> {
    pub fn create(
        link: Box<dyn AxisLink>,
        settings: Option<SyncSettings>,
        command_receiver: mpsc::Receiver<SyncCommand>,
        sample_receiver: mpsc::Receiver<LocalSample>,
        now: Instant,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        info!("Creating sync engine with settings: {:?}", settings);

        let (snapshot_sender, _) = watch::channel(RigSnapshot::default());
        debug!("Created watch channel for rig snapshots");

        Self::new(
            settings,
            AxisStore::new(),
            link,
            command_receiver,
            sample_receiver,
            snapshot_sender,
            HashMap::new(), // rate_samples
            HashMap::new(), // delta_accum
            Vec::new(),     // updated_axes
            now,            // cycle_time
            now,            // last_tick
            0,              // stat_reports
            0,              // stat_decode_errors
        )
    }

    /// Runs the first half of a cycle: drain commands and device samples,
    /// advance local axes by the elapsed time, and pull one batch from the
    /// link. Transitions to Ingesting with whatever the link delivered.
    pub fn advance(mut self, now: Instant) -> SyncEngine<Ingesting> {
        let dt = now.saturating_duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.cycle_time = now;

        // Commands first so axes registered this tick see their samples
        loop {
            match self.command_receiver.try_recv() {
                Ok(command) => {
                    debug!("Applying command: {:?}", command);
                    self.apply_command(command);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("Command channel disconnected");
                    break;
                }
            }
        }

        // Latest device samples
        loop {
            match self.sample_receiver.try_recv() {
                Ok(sample) => self.ingest_sample(sample),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("Sample channel disconnected");
                    break;
                }
            }
        }

        self.advance_local_axes(now, dt);

        // One batch per cycle; an empty or failed receive is "no updates"
        let payload = match self.link.receive_string() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Link receive failed: {}", e);
                String::new()
            }
        };

        self.transition_with(ReportBatch { payload })
    }

    fn ingest_sample(&mut self, sample: LocalSample) {
        match self.store.get(&sample.axis_id).map(|s| s.source) {
            Some(AxisSource::Local(LocalMode::Rate)) => {
                self.rate_samples.insert(sample.axis_id, sample.value);
            }
            Some(AxisSource::Local(LocalMode::Delta)) => {
                *self.delta_accum.entry(sample.axis_id).or_insert(0.0) += sample.value;
            }
            Some(AxisSource::Remote) => {
                warn!("Device sample for remote axis ignored: {}", sample.axis_id);
            }
            None => {
                debug!("Device sample for unregistered axis ignored: {}", sample.axis_id);
            }
        }
    }

    fn advance_local_axes(&mut self, now: Instant, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        for (axis_id, state) in self.store.iter_mut() {
            let mode = match state.source {
                AxisSource::Local(mode) => mode,
                AxisSource::Remote => continue,
            };

            state.velocity = match mode {
                LocalMode::Rate => self.rate_samples.get(axis_id).copied().unwrap_or(0.0),
                LocalMode::Delta => self.delta_accum.remove(axis_id).unwrap_or(0.0) / dt,
            };
            state.position += state.velocity * dt;
            state.last_update = now;
        }
    }
}

// Implementation for Ingesting state
impl SyncEngine<Ingesting> {
    /// Decodes the received batch and applies every valid report to its
    /// axis. Malformed reports are logged and skipped; reports for axes this
    /// client does not track are silently ignored.
    pub fn apply_reports(mut self) -> SyncEngine<Publishing> {
        let payload = match self.get_state_data() {
            Some(batch) => batch.payload.clone(),
            None => {
                warn!("No report batch found in state data, this should not happen");
                String::new()
            }
        };

        let now = self.cycle_time;

        for (axis_id, result) in codec::decode_batch(&payload) {
            let reading = match result {
                Ok(reading) => reading,
                Err(e) => {
                    self.stat_decode_errors += 1;
                    warn!("Discarding malformed report for {:?}: {}", axis_id, e);
                    continue;
                }
            };

            let state = match self.store.get_mut(&axis_id) {
                Some(state) if state.source == AxisSource::Remote => state,
                Some(_) => {
                    warn!("Report for local axis ignored: {}", axis_id);
                    continue;
                }
                None => {
                    debug!("Report for untracked axis ignored: {}", axis_id);
                    continue;
                }
            };

            debug!("Receiving state report for axis: {}", axis_id);
            self.stat_reports += 1;

            // Discrepancy against the local estimate at receipt time,
            // normalized by the calibrated range
            state.error = ((reading.position - state.position) / state.range).abs();

            // Half the gap since the last refresh approximates the one-way
            // delay; project the received sample forward by it
            let delay = now.saturating_duration_since(state.last_update).as_secs_f32() / 2.0;
            state.position = reading.position
                + reading.velocity * delay
                + reading.acceleration * delay * delay / 2.0;
            state.velocity = reading.velocity;
            state.acceleration = reading.acceleration;
            state.last_update = now;

            self.updated_axes.push(axis_id);
        }

        self.transition()
    }
}

// Implementation for Publishing state
impl SyncEngine<Publishing> {
    /// Sends setpoint feedback for the axes refreshed this cycle and
    /// broadcasts the snapshot, then returns to Waiting.
    pub fn publish(mut self) -> SyncEngine<Waiting> {
        let updated: Vec<String> = self.updated_axes.drain(..).collect();
        for axis_id in updated {
            let Some(state) = self.store.get(&axis_id) else {
                continue;
            };

            if state.setpoints.is_empty() {
                debug!("No setpoints pending for {}, feedback skipped", axis_id);
                continue;
            }

            let message = codec::encode_feedback(&axis_id, &state.setpoints);
            debug!("Sending setpoint feedback: {}", message);
            if let Err(e) = self.link.send_string(&message) {
                warn!("Failed to send feedback for {}: {}", axis_id, e);
            }
        }

        let snapshot = RigSnapshot {
            axes: self
                .store
                .iter()
                .map(|(axis_id, state)| (axis_id.clone(), state.clone()))
                .collect(),
        };

        if self.snapshot_sender.send(snapshot).is_err() {
            debug!("No snapshot subscribers");
        }

        self.transition()
    }
}

/// Public handle for the engine task.
///
/// Spawns the cycle loop on a tokio interval and provides the command
/// sender, snapshot subscription, and graceful shutdown.
pub struct SyncHandle {
    command_sender: mpsc::Sender<SyncCommand>,
    snapshot_receiver: watch::Receiver<RigSnapshot>,
    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl SyncHandle {
    pub fn spawn(
        link: Box<dyn AxisLink>,
        settings: Option<SyncSettings>,
        sample_receiver: mpsc::Receiver<LocalSample>,
    ) -> Result<Self, SyncError> {
        info!("Spawning sync engine with settings: {:?}", settings);

        let (command_sender, command_receiver) = mpsc::channel(100);

        let engine = SyncEngine::create(
            link,
            settings,
            command_receiver,
            sample_receiver,
            Instant::now(),
        );
        let snapshot_receiver = engine.subscribe();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task_handle = tokio::spawn(async move {
            info!("Sync engine task started");
            run_engine_loop(engine, shutdown_rx).await;
            info!("Sync engine task finished");
        });

        info!("Sync engine successfully started");
        Ok(Self {
            command_sender,
            snapshot_receiver,
            task_handle: Some(task_handle),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn commands(&self) -> mpsc::Sender<SyncCommand> {
        self.command_sender.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RigSnapshot> {
        self.snapshot_receiver.clone()
    }

    /// Gracefully shuts down the engine and waits for task completion.
    pub async fn shutdown(&mut self) -> Result<(), SyncError> {
        debug!("Sending shutdown signal to sync engine");

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Sync engine task already terminated");
            }
        }

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| SyncError::TaskError(e.to_string()))?;
            debug!("Sync engine task completed");
        }

        Ok(())
    }
}

// Run the engine loop until shutdown
async fn run_engine_loop(mut engine: SyncEngine<Waiting>, mut shutdown_rx: oneshot::Receiver<()>) {
    let tick_interval = engine.settings().tick_interval_ms;
    info!("Starting sync loop with {}ms interval", tick_interval);

    let mut interval_timer =
        tokio::time::interval(tokio::time::Duration::from_millis(tick_interval));

    // Stats for loop monitoring
    let mut cycles: u64 = 0;
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(30);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received, leaving sync loop");
                break;
            }

            _ = interval_timer.tick() => {
                let ingesting = engine.advance(Instant::now());
                let publishing = ingesting.apply_reports();
                engine = publishing.publish();

                cycles += 1;

                let now = Local::now();
                if now - last_stats_time > stats_interval {
                    let elapsed_seconds = (now - last_stats_time).num_seconds().max(1);
                    let (reports, decode_errors) = engine.report_stats();
                    info!(
                        "Sync stats: {} cycles ({:.2}/sec), {} reports total, {} decode errors",
                        cycles,
                        cycles as f64 / elapsed_seconds as f64,
                        reports,
                        decode_errors
                    );
                    cycles = 0;
                    last_stats_time = now;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;
    use std::time::Duration;

    struct Harness {
        engine: Option<SyncEngine<Waiting>>,
        link: MemoryLink,
        commands: mpsc::Sender<SyncCommand>,
        samples: mpsc::Sender<LocalSample>,
        snapshots: watch::Receiver<RigSnapshot>,
        start: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let link = MemoryLink::new();
            let (commands, command_receiver) = mpsc::channel(100);
            let (samples, sample_receiver) = mpsc::channel(100);
            let start = Instant::now();
            let engine = SyncEngine::create(
                Box::new(link.clone()),
                None,
                command_receiver,
                sample_receiver,
                start,
            );
            let snapshots = engine.subscribe();
            Self {
                engine: Some(engine),
                link,
                commands,
                samples,
                snapshots,
                start,
            }
        }

        fn tick(&mut self, at: Duration) {
            let engine = self.engine.take().unwrap();
            let engine = engine
                .advance(self.start + at)
                .apply_reports()
                .publish();
            self.engine = Some(engine);
        }

        fn snapshot(&self) -> RigSnapshot {
            self.snapshots.borrow().clone()
        }

        fn stats(&self) -> (u64, u64) {
            self.engine.as_ref().unwrap().report_stats()
        }
    }

    #[tokio::test]
    async fn report_updates_registered_axis_with_delay_compensation() {
        let mut harness = Harness::new();
        harness.link.push_incoming("Elbow 50 10 0");

        harness
            .commands
            .send(SyncCommand::RegisterRemote {
                axis_id: "Elbow".to_string(),
                initial_position: 0.0,
            })
            .await
            .unwrap();

        // Registration happens on the same tick the report arrives, so the
        // one-way delay is half of zero and the sample is stored as-is
        harness.tick(Duration::ZERO);
        let snapshot = harness.snapshot();
        let state = snapshot.axes.get("Elbow").unwrap();
        assert_eq!(state.position, 50.0);
        assert_eq!(state.velocity, 10.0);
        assert!(state.setpoints.is_empty());
    }

    #[tokio::test]
    async fn received_sample_is_projected_by_half_the_gap() {
        let mut harness = Harness::new();

        harness
            .commands
            .send(SyncCommand::RegisterRemote {
                axis_id: "Elbow".to_string(),
                initial_position: 0.0,
            })
            .await
            .unwrap();
        harness.tick(Duration::ZERO);

        // Next report arrives a full second after the axis was last
        // refreshed: one-way delay 0.5s, position projected 50 + 10 * 0.5
        harness.link.push_incoming("Elbow 50 10 0");
        harness.tick(Duration::from_secs(1));

        let snapshot = harness.snapshot();
        let state = snapshot.axes.get("Elbow").unwrap();
        assert!((state.position - 55.0).abs() < 1e-4);
        assert_eq!(state.velocity, 10.0);
    }

    #[tokio::test]
    async fn batch_updates_registered_axes_and_ignores_unknown() {
        let mut harness = Harness::new();
        harness.link.push_incoming("A 1 0 0 : B 2 0 0 : C 5 0 0");

        for axis_id in ["A", "B"] {
            harness
                .commands
                .send(SyncCommand::RegisterRemote {
                    axis_id: axis_id.to_string(),
                    initial_position: 0.0,
                })
                .await
                .unwrap();
        }

        harness.tick(Duration::ZERO);
        let snapshot = harness.snapshot();
        assert_eq!(snapshot.absolute_position("A"), 1.0);
        assert_eq!(snapshot.absolute_position("B"), 2.0);
        // Untracked axis reads as the neutral value
        assert_eq!(snapshot.absolute_position("C"), 0.0);
        assert!(!snapshot.axes.contains_key("C"));
    }

    #[tokio::test]
    async fn malformed_report_does_not_abort_the_batch() {
        let mut harness = Harness::new();
        harness.link.push_incoming("A bogus 0 0 : B 2 0 0");

        for axis_id in ["A", "B"] {
            harness
                .commands
                .send(SyncCommand::RegisterRemote {
                    axis_id: axis_id.to_string(),
                    initial_position: 0.0,
                })
                .await
                .unwrap();
        }

        harness.tick(Duration::ZERO);
        let snapshot = harness.snapshot();
        assert_eq!(snapshot.absolute_position("A"), 0.0);
        assert_eq!(snapshot.absolute_position("B"), 2.0);
        let (reports, errors) = harness.stats();
        assert_eq!(reports, 1);
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn feedback_round_trips_normalized_setpoints() {
        let mut harness = Harness::new();
        harness.link.push_incoming("Elbow 50 0 0");

        harness
            .commands
            .send(SyncCommand::RegisterRemote {
                axis_id: "Elbow".to_string(),
                initial_position: 0.0,
            })
            .await
            .unwrap();
        harness
            .commands
            .send(SyncCommand::CalibrateRange {
                axis_id: "Elbow".to_string(),
                min_position: 0.0,
                max_position: 100.0,
            })
            .await
            .unwrap();
        harness
            .commands
            .send(SyncCommand::SetFeedback {
                axis_id: "Elbow".to_string(),
                speed: 0.5,
                setpoints: vec![-1.0, 0.0, 1.0],
            })
            .await
            .unwrap();

        harness.tick(Duration::ZERO);

        let sent = harness.link.sent();
        assert_eq!(sent.len(), 1);

        // The peer decodes feedback with the same whitespace grammar; the
        // denormalized setpoints must map back onto [-1, 0, 1]
        let fields: Vec<f32> = sent[0]
            .split_whitespace()
            .skip(1)
            .map(|f| f.parse().unwrap())
            .collect();
        assert_eq!(fields, vec![0.0, 50.0, 100.0]);
        for (native, normalized) in fields.iter().zip([-1.0_f32, 0.0, 1.0]) {
            let recovered = (native - 0.0) / 50.0 - 1.0;
            assert!((recovered - normalized).abs() < 1e-6);
        }

        let snapshot = harness.snapshot();
        let state = snapshot.axes.get("Elbow").unwrap();
        // actual velocity denormalized by range / 2
        assert_eq!(state.actual_velocity, 25.0);
        // immediate target is the first mapped setpoint
        assert_eq!(state.actual_position, 0.0);
        assert_eq!(state.setpoints, vec![0.0, 50.0, 100.0]);
    }

    #[tokio::test]
    async fn feedback_not_sent_without_fresh_report() {
        let mut harness = Harness::new();

        harness
            .commands
            .send(SyncCommand::RegisterRemote {
                axis_id: "Elbow".to_string(),
                initial_position: 0.0,
            })
            .await
            .unwrap();
        harness
            .commands
            .send(SyncCommand::SetFeedback {
                axis_id: "Elbow".to_string(),
                speed: 0.0,
                setpoints: vec![0.5],
            })
            .await
            .unwrap();

        // No incoming report this cycle, so nothing is relayed
        harness.tick(Duration::ZERO);
        assert!(harness.link.sent().is_empty());
    }

    #[tokio::test]
    async fn report_does_not_touch_setpoints() {
        let mut harness = Harness::new();
        harness.link.push_incoming("Elbow 10 0 0");

        harness
            .commands
            .send(SyncCommand::RegisterRemote {
                axis_id: "Elbow".to_string(),
                initial_position: 0.0,
            })
            .await
            .unwrap();
        harness
            .commands
            .send(SyncCommand::SetFeedback {
                axis_id: "Elbow".to_string(),
                speed: 0.0,
                setpoints: vec![0.25, 0.75],
            })
            .await
            .unwrap();

        harness.tick(Duration::ZERO);
        let before = harness.snapshot().axes.get("Elbow").unwrap().setpoints.clone();

        harness.link.push_incoming("Elbow 20 0 0");
        harness.tick(Duration::from_millis(100));
        let after = harness.snapshot().axes.get("Elbow").unwrap().setpoints.clone();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn local_rate_axis_integrates_held_deflection() {
        let mut harness = Harness::new();

        harness
            .commands
            .send(SyncCommand::RegisterLocal {
                axis_id: "StickX".to_string(),
                mode: LocalMode::Rate,
                initial_position: 0.0,
            })
            .await
            .unwrap();
        harness.tick(Duration::ZERO);

        harness
            .samples
            .send(LocalSample::new("StickX", 0.5))
            .await
            .unwrap();
        harness.tick(Duration::from_secs(1));

        // No further event: the stick is still deflected, motion continues
        harness.tick(Duration::from_secs(2));

        let snapshot = harness.snapshot();
        let state = snapshot.axes.get("StickX").unwrap();
        assert!((state.position - 1.0).abs() < 1e-5);
        assert_eq!(state.velocity, 0.5);
        // Local axes normalize against their own unit range
        assert_eq!(snapshot.axis_speed("StickX", harness.start), 0.5);
    }

    #[tokio::test]
    async fn local_delta_axis_converts_increments_to_velocity() {
        let mut harness = Harness::new();

        harness
            .commands
            .send(SyncCommand::RegisterLocal {
                axis_id: "Jog".to_string(),
                mode: LocalMode::Delta,
                initial_position: 10.0,
            })
            .await
            .unwrap();
        harness.tick(Duration::ZERO);

        harness.samples.send(LocalSample::new("Jog", 2.0)).await.unwrap();
        harness.samples.send(LocalSample::new("Jog", 1.0)).await.unwrap();
        harness.tick(Duration::from_secs(1));

        let snapshot = harness.snapshot();
        let state = snapshot.axes.get("Jog").unwrap();
        assert!((state.position - 13.0).abs() < 1e-5);
        assert!((state.velocity - 3.0).abs() < 1e-5);

        // No increments in the following second: the axis stops
        harness.tick(Duration::from_secs(2));
        let snapshot = harness.snapshot();
        let state = snapshot.axes.get("Jog").unwrap();
        assert!((state.position - 13.0).abs() < 1e-5);
        assert_eq!(state.velocity, 0.0);
    }

    #[tokio::test]
    async fn error_tracks_normalized_discrepancy() {
        let mut harness = Harness::new();
        harness.link.push_incoming("Elbow 0 0 0");

        harness
            .commands
            .send(SyncCommand::RegisterRemote {
                axis_id: "Elbow".to_string(),
                initial_position: 0.0,
            })
            .await
            .unwrap();
        harness
            .commands
            .send(SyncCommand::CalibrateRange {
                axis_id: "Elbow".to_string(),
                min_position: 0.0,
                max_position: 100.0,
            })
            .await
            .unwrap();
        harness.tick(Duration::ZERO);

        // The local estimate still sits at 0 but the peer reports 20:
        // normalized discrepancy 20 / 100
        harness.link.push_incoming("Elbow 20 0 0");
        harness.tick(Duration::from_millis(10));

        let snapshot = harness.snapshot();
        let state = snapshot.axes.get("Elbow").unwrap();
        assert!((state.error - 0.2).abs() < 1e-4);
    }

    #[tokio::test]
    async fn removed_axis_reads_neutral() {
        let mut harness = Harness::new();

        harness
            .commands
            .send(SyncCommand::RegisterRemote {
                axis_id: "Elbow".to_string(),
                initial_position: 5.0,
            })
            .await
            .unwrap();
        harness.tick(Duration::ZERO);
        assert_eq!(harness.snapshot().absolute_position("Elbow"), 5.0);

        harness
            .commands
            .send(SyncCommand::RemoveAxis {
                axis_id: "Elbow".to_string(),
            })
            .await
            .unwrap();
        harness.tick(Duration::from_millis(20));

        let snapshot = harness.snapshot();
        assert_eq!(snapshot.absolute_position("Elbow"), 0.0);
        assert_eq!(snapshot.axis_speed("Elbow", harness.start), 0.0);
    }
}
