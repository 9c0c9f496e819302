use super::config_portal::{ConfigPortal, ConfigResult, PortalAction};
use super::{ConnectionConfig, MainConfig, RigConfig, SessionConfig};
use crate::device::DeviceConfig;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONFIG_DIR: &str = ".config/openrig/config";
const MAIN_CONFIG_FILE: &str = "main_config.toml";
const RIG_CONFIG_FILE: &str = "rig_config.toml";
const CONNECTION_CONFIG_FILE: &str = "connection_config.toml";
const DEVICE_CONFIG_FILE: &str = "device_config.toml";

const DEFAULT_SESSION: &str = "default";

/// Loads and saves session directories and keeps the portal in sync with
/// what is on disk.
pub struct SessionClient {
    base_path: PathBuf,
    current_session: String,
    config_portal: Arc<ConfigPortal>,
}

impl SessionClient {
    /// Default configuration root under the user's home directory.
    pub fn default_base_path() -> PathBuf {
        let mut base = dirs::home_dir().unwrap_or_else(|| {
            warn!("Could not determine home directory, using current directory");
            PathBuf::from(".")
        });
        base.push(CONFIG_DIR);
        base
    }

    /// Makes sure the configuration root and a default session exist.
    pub async fn ensure_default_config(base_path: &Path) -> Result<()> {
        if !tokio::fs::try_exists(base_path)
            .await
            .map_err(|e| eyre!("Failed to check config directory: {}", e))?
        {
            info!("Creating default configuration at {}", base_path.display());
            tokio::fs::create_dir_all(base_path)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let session_path = base_path.join(DEFAULT_SESSION);
        if !tokio::fs::try_exists(&session_path)
            .await
            .map_err(|e| eyre!("Failed to check default session directory: {}", e))?
        {
            tokio::fs::create_dir_all(&session_path)
                .await
                .map_err(|e| eyre!("Failed to create default session directory: {}", e))?;

            let main_config = MainConfig {
                last_session: Some(DEFAULT_SESSION.to_string()),
            };
            write_toml(&base_path.join(MAIN_CONFIG_FILE), &main_config).await?;

            write_toml(&session_path.join(RIG_CONFIG_FILE), &RigConfig::default()).await?;
            write_toml(
                &session_path.join(CONNECTION_CONFIG_FILE),
                &ConnectionConfig::default(),
            )
            .await?;
            write_toml(
                &session_path.join(DEVICE_CONFIG_FILE),
                &DeviceConfig::default(),
            )
            .await?;
            info!("Default session created");
        }

        Ok(())
    }

    /// Loads the session recorded in main_config.toml (or the default one)
    /// and builds the portal from its contents.
    pub async fn load_last_session(base_path: PathBuf) -> Result<Self> {
        Self::ensure_default_config(&base_path).await?;

        let main_config: MainConfig =
            read_toml_or_default(&base_path.join(MAIN_CONFIG_FILE), "main config").await;
        let session_name = main_config
            .last_session
            .unwrap_or_else(|| DEFAULT_SESSION.to_string());

        info!("Loading session: {}", session_name);
        let (rig, connection, device) = load_session_files(&base_path, &session_name).await?;

        let session = SessionConfig {
            session_name: session_name.clone(),
            last_session: Some(session_name.clone()),
            path: base_path.join(&session_name),
            available_sessions: scan_available_sessions(&base_path).await?,
        };

        let config_portal = Arc::new(ConfigPortal::new(session, rig, connection, device));

        Ok(Self {
            base_path,
            current_session: session_name,
            config_portal,
        })
    }

    pub fn get_portal_ref(&self) -> Arc<ConfigPortal> {
        self.config_portal.clone()
    }

    pub fn current_session(&self) -> &str {
        &self.current_session
    }

    pub async fn save_current_session(&self) -> Result<()> {
        self.save_session(&self.current_session.clone()).await
    }

    /// Writes the portal's current contents into a session directory.
    pub async fn save_session(&self, name: &str) -> Result<()> {
        let session_path = self.base_path.join(name);

        if !tokio::fs::try_exists(&session_path)
            .await
            .map_err(|e| eyre!("Failed to check session directory: {}", e))?
        {
            tokio::fs::create_dir_all(&session_path)
                .await
                .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
        }

        let rig_config = match self.config_portal.execute_portal_action(PortalAction::GetRigConfig)
        {
            ConfigResult::RigConfig(rig) => rig,
            _ => {
                warn!("Could not retrieve valid rig config, saving defaults");
                RigConfig::default()
            }
        };

        let connection_config = match self
            .config_portal
            .execute_portal_action(PortalAction::GetConnectionConfig)
        {
            ConfigResult::ConnectionConfig(connection) => connection,
            _ => {
                warn!("Could not retrieve valid connection config, saving defaults");
                ConnectionConfig::default()
            }
        };

        let device_config = match self
            .config_portal
            .execute_portal_action(PortalAction::GetDeviceConfig)
        {
            ConfigResult::DeviceConfig(device) => device,
            _ => {
                warn!("Could not retrieve valid device config, saving defaults");
                DeviceConfig::default()
            }
        };

        write_toml(&session_path.join(RIG_CONFIG_FILE), &rig_config).await?;
        write_toml(&session_path.join(CONNECTION_CONFIG_FILE), &connection_config).await?;
        write_toml(&session_path.join(DEVICE_CONFIG_FILE), &device_config).await?;

        let main_config = MainConfig {
            last_session: Some(name.to_string()),
        };
        write_toml(&self.base_path.join(MAIN_CONFIG_FILE), &main_config).await?;

        info!("Session {} saved successfully", name);
        Ok(())
    }

    /// Switches to another session and replaces the portal contents with
    /// its files.
    pub async fn change_session(&mut self, name: &str) -> Result<()> {
        let session_path = self.base_path.join(name);
        if !tokio::fs::try_exists(&session_path)
            .await
            .map_err(|e| eyre!("Failed to check session directory: {}", e))?
        {
            return Err(eyre!("Session directory does not exist: {}", name));
        }

        let (rig, connection, device) = load_session_files(&self.base_path, name).await?;

        self.config_portal
            .execute_portal_action(PortalAction::WriteRigConfig(rig));
        self.config_portal
            .execute_portal_action(PortalAction::WriteConnectionConfig(connection));
        self.config_portal
            .execute_portal_action(PortalAction::WriteDeviceConfig(device));

        let session = SessionConfig {
            session_name: name.to_string(),
            last_session: Some(self.current_session.clone()),
            path: session_path,
            available_sessions: scan_available_sessions(&self.base_path).await?,
        };
        self.config_portal
            .execute_portal_action(PortalAction::WriteSession(session));

        self.current_session = name.to_string();
        info!("Switched to session: {}", name);
        Ok(())
    }

    /// Deletes a session directory.
    pub async fn delete_session(&self, name: &str) -> Result<()> {
        let session_path = self.base_path.join(name);

        if tokio::fs::try_exists(&session_path)
            .await
            .map_err(|e| eyre!("Failed to check session directory: {}", e))?
        {
            tokio::fs::remove_dir_all(&session_path)
                .await
                .map_err(|e| eyre!("Failed to delete session directory: {}", e))?;

            info!("Session {} deleted successfully", name);
            Ok(())
        } else {
            Err(eyre!("Session directory does not exist: {}", name))
        }
    }

    pub async fn list_sessions(&self) -> Result<HashMap<String, PathBuf>> {
        scan_available_sessions(&self.base_path).await
    }

    /// Periodically writes the current session back to disk.
    pub fn start_autosave_task(
        client: Arc<Mutex<SessionClient>>,
        interval_seconds: u64,
    ) -> JoinHandle<()> {
        info!("Starting autosave task with interval: {}s", interval_seconds);

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));
            // The first tick fires immediately; skip it
            interval.tick().await;

            loop {
                interval.tick().await;

                let guard = client.lock().await;
                if let Err(e) = guard.save_current_session().await {
                    error!("Failed to autosave configuration: {}", e);
                } else {
                    debug!("Configuration autosaved successfully");
                }
            }
        })
    }
}

// Loads the three section files of a session, tolerating missing ones
async fn load_session_files(
    base_path: &Path,
    session_name: &str,
) -> Result<(RigConfig, ConnectionConfig, DeviceConfig)> {
    let session_path = base_path.join(session_name);

    if !tokio::fs::try_exists(&session_path)
        .await
        .map_err(|e| eyre!("Failed to check session directory: {}", e))?
    {
        return Err(eyre!("Session directory does not exist: {}", session_name));
    }

    let rig = read_toml_or_default(&session_path.join(RIG_CONFIG_FILE), "rig config").await;
    let connection =
        read_toml_or_default(&session_path.join(CONNECTION_CONFIG_FILE), "connection config")
            .await;
    let device = read_toml_or_default(&session_path.join(DEVICE_CONFIG_FILE), "device config").await;

    Ok((rig, connection, device))
}

// Scans the configuration root for session directories
async fn scan_available_sessions(base_path: &Path) -> Result<HashMap<String, PathBuf>> {
    if !tokio::fs::try_exists(base_path)
        .await
        .map_err(|e| eyre!("Failed to check config directory: {}", e))?
    {
        debug!("Config directory does not exist, no sessions available");
        return Ok(HashMap::new());
    }

    let mut available_sessions = HashMap::new();

    let mut read_dir = tokio::fs::read_dir(base_path)
        .await
        .map_err(|e| eyre!("Failed to read config directory: {}", e))?;

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| eyre!("Failed to read directory entry: {}", e))?
    {
        let path = entry.path();

        let is_dir = tokio::fs::metadata(&path)
            .await
            .map_err(|e| eyre!("Failed to get metadata for {}: {}", path.display(), e))?
            .is_dir();

        if is_dir {
            if let Some(session_name) = path.file_name().and_then(|n| n.to_str()) {
                debug!("Found session: {}", session_name);
                available_sessions.insert(session_name.to_string(), path);
            }
        }
    }

    Ok(available_sessions)
}

// Reads a TOML section file, falling back to defaults when it is missing or
// unparseable
async fn read_toml_or_default<T>(path: &Path, label: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match tokio::fs::read_to_string(path).await {
        Ok(content) => match toml::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse {} at {}: {}", label, path.display(), e);
                T::default()
            }
        },
        Err(e) => {
            warn!(
                "{} not readable at {}, using defaults: {}",
                label,
                path.display(),
                e
            );
            T::default()
        }
    }
}

async fn write_toml<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = toml::to_string_pretty(value)
        .map_err(|e| eyre!("Failed to serialize {}: {}", path.display(), e))?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;

    Ok(())
}
