use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "power_ble_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Overrides the exchange service URL baked in at build time
    #[serde(default)]
    pub api_base_url: Option<String>,

    // BLE timing
    #[serde(default = "default_scan_window_secs")]
    pub scan_window_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_settle_window_secs")]
    pub settle_window_secs: u64,
    #[serde(default = "default_true")]
    pub refresh_services: bool,

    // Exchange service
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            scan_window_secs: default_scan_window_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            settle_window_secs: default_settle_window_secs(),
            refresh_services: true,
            request_timeout_secs: default_request_timeout_secs(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_scan_window_secs() -> u64 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_settle_window_secs() -> u64 {
    2
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Settings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            scan_window: Duration::from_secs(self.scan_window_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            settle_window: Duration::from_secs(self.settle_window_secs),
            refresh_services: self.refresh_services,
        }
    }
}

/// Exchange service URL injected when the binary was built.
///
/// `API_BASE_URL` wins; otherwise `HOST_IP` and `HOST_PORT` are combined.
pub fn build_time_base_url() -> Option<String> {
    if let Some(url) = option_env!("API_BASE_URL").filter(|s| !s.is_empty()) {
        return Some(url.to_string());
    }
    match (option_env!("HOST_IP"), option_env!("HOST_PORT")) {
        (Some(ip), Some(port)) if !ip.is_empty() && !port.is_empty() => {
            Some(format!("https://{ip}:{port}"))
        }
        _ => None,
    }
}

/// Configuration for connection behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// How long a discovery scan listens for advertisements
    pub scan_window: Duration,
    /// Upper bound on link establishment
    pub connect_timeout: Duration,
    /// How long the link stays up after a write for the confirmation notification
    pub settle_window: Duration,
    /// Force fresh service discovery instead of trusting a platform cache
    pub refresh_services: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            settle_window: Duration::from_secs(2),
            refresh_services: true,
        }
    }
}

/// Immutable configuration for one process, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: Url,
    pub connection: ConnectionConfig,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Self::resolve_with(settings, build_time_base_url())
    }

    fn resolve_with(settings: &Settings, build_time: Option<String>) -> Result<Self, ConfigError> {
        let raw = settings
            .api_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or(build_time)
            .ok_or(ConfigError::MissingBaseUrl)?;
        let api_base_url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidBaseUrl {
            value: raw.clone(),
            source,
        })?;

        Ok(Self {
            api_base_url,
            connection: settings.connection_config(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        })
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file; a missing or unreadable file yields defaults.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PowerBleController");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
