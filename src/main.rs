pub mod axis;
pub mod calibration;
pub mod device;
pub mod link;
pub mod persistence;
pub mod sync;

use crate::calibration::{CalibrationHandle, CalibrationSession};
use crate::device::collector::CollectorHandle;
use crate::device::DeviceConfig;
use crate::link::{LinkConfig, UdpAxisLink};
use crate::persistence::config_portal::{ConfigPortal, ConfigResult, PortalAction};
use crate::persistence::persistence_worker::PersistenceManager;
use crate::persistence::session_client::SessionClient;
use crate::persistence::RigConfig;
use crate::sync::{SyncCommand, SyncHandle};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // Configuration first: everything else is wired from the portal
    info!("Loading configuration");
    let persistence =
        PersistenceManager::new(SessionClient::default_base_path(), 300).await?;
    let config_portal = persistence.get_cfg_portal().await;

    let link_config = get_link_conf(&config_portal);
    let device_config = get_device_conf(&config_portal);
    let rig_config = get_rig_conf(&config_portal);

    // Link to the remote motion controller
    let link = UdpAxisLink::connect(&link_config)
        .map_err(|e| eyre!("Failed to connect axis link: {}", e))?;

    // Device collector feeding local samples into the engine
    let (sample_sender, sample_receiver) = mpsc::channel(1000);
    let _collector_handle = CollectorHandle::spawn(device_config.clone(), sample_sender)
        .map_err(|e| eyre!("Failed to spawn device collector: {}", e))?;

    // Sync engine owning the axis store
    let mut sync_handle = SyncHandle::spawn(Box::new(link), None, sample_receiver)
        .map_err(|e| eyre!("Failed to spawn sync engine: {}", e))?;
    let engine_commands = sync_handle.commands();

    // Register the locally driven axes from the device bindings
    for binding in device_config.bindings.values() {
        engine_commands
            .send(SyncCommand::RegisterLocal {
                axis_id: binding.axis_id.clone(),
                mode: binding.mode,
                initial_position: 0.0,
            })
            .await
            .map_err(|e| eyre!("Failed to register local axis: {}", e))?;
    }

    // One calibration session per persisted motion axis
    let mut calibration_handles = Vec::new();
    for motion_axis_id in rig_config.axes.keys() {
        info!("Restoring calibration session for {}", motion_axis_id);
        let session = CalibrationSession::new(
            motion_axis_id,
            config_portal.clone(),
            engine_commands.clone(),
            sync_handle.subscribe(),
        );
        calibration_handles.push(CalibrationHandle::spawn(session, None));
    }

    info!("OpenRig running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;

    info!("Shutting down");
    for mut handle in calibration_handles {
        handle.shutdown().await;
    }
    if let Err(e) = sync_handle.shutdown().await {
        warn!("Sync engine shutdown failed: {}", e);
    }
    persistence.shutdown().await?;

    info!("Goodbye");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn get_link_conf(config_portal: &Arc<ConfigPortal>) -> LinkConfig {
    match config_portal.execute_portal_action(PortalAction::GetLinkConfig) {
        ConfigResult::LinkConfig(link_config) => link_config,
        _ => {
            warn!("Unable to read link config, using defaults");
            LinkConfig::default()
        }
    }
}

fn get_device_conf(config_portal: &Arc<ConfigPortal>) -> DeviceConfig {
    match config_portal.execute_portal_action(PortalAction::GetDeviceConfig) {
        ConfigResult::DeviceConfig(device_config) => device_config,
        _ => {
            warn!("Unable to read device config, using defaults");
            DeviceConfig::default()
        }
    }
}

fn get_rig_conf(config_portal: &Arc<ConfigPortal>) -> RigConfig {
    match config_portal.execute_portal_action(PortalAction::GetRigConfig) {
        ConfigResult::RigConfig(rig_config) => rig_config,
        _ => {
            warn!("Unable to read rig config, using defaults");
            RigConfig::default()
        }
    }
}
