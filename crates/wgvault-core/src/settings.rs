use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Floor for the automatic sync interval.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Set once the legacy single-server config has been converted, so later
    /// starts skip migration even if the old file is still on disk.
    /// Serialized first: scalar values must precede the tables below.
    #[serde(default)]
    pub legacy_migrated: bool,
    #[serde(default)]
    pub defaults: WizardDefaults,
    #[serde(default)]
    pub webdav: WebDavSettings,
}

/// Pre-filled values for the interface step of the wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardDefaults {
    #[serde(default = "default_interface_name")]
    pub interface_name: String,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub dns: Option<String>,
}

fn default_interface_name() -> String {
    "wg0".to_string()
}

impl Default for WizardDefaults {
    fn default() -> Self {
        Self {
            interface_name: default_interface_name(),
            listen_port: None,
            dns: None,
        }
    }
}

/// Connection settings for the remote WebDAV store. The password is passed
/// through to the server unchanged and stored as entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebDavSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default)]
    pub auto_sync_enabled: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_sync_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for WebDavSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: String::new(),
            username: String::new(),
            password: String::new(),
            sync_interval_secs: default_sync_interval(),
            auto_sync_enabled: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl WebDavSettings {
    /// Interval between automatic sync ticks, clamped to the floor.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(MIN_SYNC_INTERVAL_SECS))
    }

    /// Bound for each request to the remote store.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub async fn load(path: &Path) -> Result<AppSettings, SettingsError> {
    debug!(path = %path.display(), "loading settings");

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let settings: AppSettings = toml::from_str(&contents)?;
            debug!(
                path = %path.display(),
                webdav_enabled = settings.webdav.enabled,
                "loaded settings"
            );
            Ok(settings)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "settings file not found, using defaults");
            Ok(AppSettings::default())
        }
        Err(e) => Err(SettingsError::Read(e)),
    }
}

pub async fn save(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(settings)?;
    tokio::fs::write(path, contents).await?;
    debug!(path = %path.display(), "saved settings");
    Ok(())
}
