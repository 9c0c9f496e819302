//! # Configuration Portal - Central Configuration Management Hub
//!
//! Implements the central configuration management system for OpenRig,
//! providing thread-safe access to all application configuration data
//! through a unified interface. The portal is the convergence point where
//! calibration, connection, and device configuration flow together for
//! coordinated access and persistence.
//!
//! ## Why This Module Exists
//!
//! OpenRig's architecture runs several concurrent tasks (sync engine,
//! device collector, calibration session, persistence worker) that all need
//! coordinated access to shared configuration. This portal provides:
//! - **Thread-safe configuration access** across all application components
//! - **Atomic configuration updates** to prevent inconsistent state
//! - **A single configuration point** instead of scattered config handling
//!
//! ## Thread Safety Strategy
//! Each configuration section is wrapped in `Arc<RwLock<T>>`:
//! - **Multiple concurrent readers**: tasks read configuration without
//!   blocking each other
//! - **Exclusive write access**: updates are atomic and consistent
//! - **Shared ownership**: the portal is cloned into any task that needs it
//!
//! ## Action/Result Pattern
//! Operations go through a dispatch enum rather than direct methods:
//! - **Uniform error handling**: all operations share the same retry logic
//! - **Centralized locking**: a single implementation handles lock
//!   contention
//! - **Extensibility**: new operations are enum additions
//!
//! ## Lock Contention Handling
//! The `try_lock!` macro retries five times with 10ms delays, then returns
//! a timeout error instead of blocking indefinitely; contention is logged
//! for debugging.

use crate::device::DeviceConfig;
use crate::link::LinkConfig;
use crate::try_lock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AxisCalibration, ConnectionConfig, RigConfig, SessionConfig};

/// Central hub for all application configuration data with thread-safe
/// access.
///
/// ## Configuration Sections
/// - **Session**: current session name, available sessions, paths
/// - **Rig**: per-axis calibration records and control-axis bindings
/// - **Connection**: UDP link to the motion controller
/// - **Device**: gamepad deadzone and axis bindings
#[derive(Default, Debug)]
pub struct ConfigPortal {
    /// Session management and metadata
    pub session: Arc<RwLock<SessionConfig>>,

    /// Calibration bounds and bindings per motion axis
    pub rig_config: Arc<RwLock<RigConfig>>,

    /// Network configuration for the axis link
    pub connection_config: Arc<RwLock<ConnectionConfig>>,

    /// Local input device configuration
    pub device_config: Arc<RwLock<DeviceConfig>>,
}

impl ConfigPortal {
    /// Creates a new ConfigPortal from loaded configuration data.
    ///
    /// Happens once during startup after the session is read from disk;
    /// each section gets its own lock so unrelated operations don't contend.
    pub fn new(
        session: SessionConfig,
        rig_config: RigConfig,
        connection_config: ConnectionConfig,
        device_config: DeviceConfig,
    ) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
            rig_config: Arc::new(RwLock::new(rig_config)),
            connection_config: Arc::new(RwLock::new(connection_config)),
            device_config: Arc::new(RwLock::new(device_config)),
        }
    }

    /// Executes configuration operations through the unified action dispatch
    /// pattern.
    ///
    /// Each action is processed through the `try_lock!` macro, which
    /// provides lock acquisition with bounded retries and converts lock
    /// starvation into `ConfigResult::Failed` instead of hanging a task.
    pub fn execute_portal_action(&self, action: PortalAction) -> ConfigResult {
        let result = match action {
            // Session configuration operations
            PortalAction::GetSession => {
                try_lock!(@read_lock_retry, self.session.clone(), |guard: &SessionConfig| {
                    ConfigResult::SessionConfig(guard.clone())
                })
            }
            PortalAction::GetSessionName => {
                try_lock!(@read_lock_retry, self.session.clone(), |guard: &SessionConfig| {
                    ConfigResult::String(guard.session_name.clone())
                })
            }
            PortalAction::GetSessionPath => {
                try_lock!(@read_lock_retry, self.session.clone(), |guard: &SessionConfig| {
                    ConfigResult::PathBuf(guard.path.clone())
                })
            }
            PortalAction::GetAvailableSessions => {
                try_lock!(@read_lock_retry, self.session.clone(), |guard: &SessionConfig| {
                    ConfigResult::AvailableSessions(guard.available_sessions.clone())
                })
            }
            PortalAction::WriteSession(session_config) => {
                try_lock!(@write_lock_retry, self.session.clone(), |guard: &mut SessionConfig| {
                    *guard = session_config;
                })
            }
            PortalAction::WriteAvailableSessions(sessions) => {
                try_lock!(@write_lock_retry, self.session.clone(), |guard: &mut SessionConfig| {
                    guard.available_sessions = sessions;
                })
            }

            // Rig calibration operations
            PortalAction::GetRigConfig => {
                try_lock!(@read_lock_retry, self.rig_config.clone(), |guard: &RigConfig| {
                    ConfigResult::RigConfig(guard.clone())
                })
            }
            PortalAction::GetAxisCalibration(motion_axis_id) => {
                try_lock!(@read_lock_retry, self.rig_config.clone(), |guard: &RigConfig| {
                    ConfigResult::AxisCalibration(guard.axis(&motion_axis_id))
                })
            }
            PortalAction::WriteRigConfig(rig_config) => {
                try_lock!(@write_lock_retry, self.rig_config.clone(), |guard: &mut RigConfig| {
                    *guard = rig_config;
                })
            }
            PortalAction::WriteAxisCalibration(motion_axis_id, calibration) => {
                try_lock!(@write_lock_retry, self.rig_config.clone(), |guard: &mut RigConfig| {
                    guard.axes.insert(motion_axis_id, calibration);
                })
            }
            PortalAction::DeleteAxisCalibration(motion_axis_id) => {
                try_lock!(@write_lock_retry, self.rig_config.clone(), |guard: &mut RigConfig| {
                    guard.axes.remove(&motion_axis_id);
                })
            }

            // Connection configuration operations
            PortalAction::GetLinkConfig => {
                try_lock!(@read_lock_retry, self.connection_config.clone(), |guard: &ConnectionConfig| {
                    ConfigResult::LinkConfig(guard.link.clone())
                })
            }
            PortalAction::GetConnectionConfig => {
                try_lock!(@read_lock_retry, self.connection_config.clone(), |guard: &ConnectionConfig| {
                    ConfigResult::ConnectionConfig(guard.clone())
                })
            }
            PortalAction::WriteLinkConfig(link_config) => {
                try_lock!(@write_lock_retry, self.connection_config.clone(), |guard: &mut ConnectionConfig| {
                    guard.link = link_config;
                })
            }
            PortalAction::WriteConnectionConfig(connection_config) => {
                try_lock!(@write_lock_retry, self.connection_config.clone(), |guard: &mut ConnectionConfig| {
                    *guard = connection_config;
                })
            }

            // Device configuration operations
            PortalAction::GetDeviceConfig => {
                try_lock!(@read_lock_retry, self.device_config.clone(), |guard: &DeviceConfig| {
                    ConfigResult::DeviceConfig(guard.clone())
                })
            }
            PortalAction::WriteDeviceConfig(device_config) => {
                try_lock!(@write_lock_retry, self.device_config.clone(), |guard: &mut DeviceConfig| {
                    *guard = device_config;
                })
            }
        };

        match result {
            Ok(res) => res,
            Err(e) => ConfigResult::Failed(e),
        }
    }
}

/// Enumeration of all possible configuration operations.
///
/// Operations follow a consistent pattern: `Get{Thing}` reads return cloned
/// data, `Write{Thing}` operations take owned data. Axis-level calibration
/// operations exist alongside whole-section access so the calibration
/// session can touch one motion axis without copying the rig table.
#[derive(Debug)]
pub enum PortalAction {
    // Session configuration management
    GetSession,
    GetSessionName,
    GetSessionPath,
    GetAvailableSessions,
    WriteSession(SessionConfig),
    WriteAvailableSessions(HashMap<String, PathBuf>),

    // Rig calibration management
    GetRigConfig,
    GetAxisCalibration(String),
    WriteRigConfig(RigConfig),
    WriteAxisCalibration(String, AxisCalibration),
    DeleteAxisCalibration(String),

    // Network configuration management
    GetLinkConfig,
    GetConnectionConfig,
    WriteLinkConfig(LinkConfig),
    WriteConnectionConfig(ConnectionConfig),

    // Device configuration management
    GetDeviceConfig,
    WriteDeviceConfig(DeviceConfig),
}

/// Type-safe return values for configuration operations.
///
/// Callers pattern match on the variant they expect; all failures use the
/// same `Failed` variant.
pub enum ConfigResult {
    Success,
    SessionConfig(SessionConfig),
    String(String),
    PathBuf(PathBuf),
    AvailableSessions(HashMap<String, PathBuf>),
    RigConfig(RigConfig),
    AxisCalibration(AxisCalibration),
    ConnectionConfig(ConnectionConfig),
    LinkConfig(LinkConfig),
    DeviceConfig(DeviceConfig),
    Failed(Error),
}

/// Lock retry macro with timeout and logging.
///
/// The write and read arms share the same retry strategy: five attempts
/// with 10ms delays, warnings on contention, and a `LockTimeout` error
/// instead of blocking indefinitely. Write operations mutate in place and
/// report `Success`; read operations build their own result variant.
#[macro_export]
macro_rules! try_lock {
    // Write lock retry with timeout and error handling
    (@write_lock_retry, $accessor:expr, $operation:expr) => {{
        let mut attempts = 0;
        const MAX_ATTEMPTS: usize = 5;

        // Write operations may consume their captures, so the closure is
        // parked in an Option and taken on the successful attempt
        let mut operation = Some($operation);

        loop {
            match $accessor.try_write() {
                Ok(mut guard) => {
                    if let Some(operation) = operation.take() {
                        operation(&mut *guard);
                    }
                    break Ok($crate::persistence::config_portal::ConfigResult::Success);
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        "Write lock blocked: {} (attempt {}/{})",
                        e,
                        attempts,
                        MAX_ATTEMPTS
                    );

                    if attempts >= MAX_ATTEMPTS {
                        break Err($crate::persistence::config_portal::Error::LockTimeout);
                    }

                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
    }};

    // Read lock retry with timeout and error handling
    (@read_lock_retry, $accessor:expr, $operation:expr) => {{
        let mut attempts = 0;
        const MAX_ATTEMPTS: usize = 5;

        loop {
            match $accessor.try_read() {
                Ok(guard) => {
                    let result = $operation(&*guard);
                    break Ok(result);
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        "Read lock blocked: {} (attempt {}/{})",
                        e,
                        attempts,
                        MAX_ATTEMPTS
                    );

                    if attempts >= MAX_ATTEMPTS {
                        break Err($crate::persistence::config_portal::Error::LockTimeout);
                    }

                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
    }};
}

/// Error types for configuration portal operations.
///
/// Configuration errors are recoverable and must not crash the application:
/// lock timeouts indicate high load and can be retried, session errors are
/// surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Could not acquire lock after maximum retry attempts")]
    LockTimeout,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
