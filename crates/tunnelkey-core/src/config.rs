//! Configuration resolution for tunnelkey.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/tunnelkey/config.json`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the daemon binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default WireGuard key rotation interval (7 days).
pub const DEFAULT_KEYS_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Complete tunnelkey configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub issuance: IssuanceConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub log_level: String,
    pub settings_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            settings_path: None,
        }
    }
}

/// Key-issuance endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceConfig {
    pub api_url: String,
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.ivpn.net".to_string(),
            http_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl IssuanceConfig {
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Key rotation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Interval applied to sessions that have none stored.
    pub default_interval_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: DEFAULT_KEYS_INTERVAL.as_secs(),
        }
    }
}

impl RotationConfig {
    pub const fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config() -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tunnelkey").join("config.json"))
}

/// Get the default preferences (settings) file path.
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tunnelkey").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.daemon.settings_path.is_some() {
        base.daemon.settings_path = overlay.daemon.settings_path;
    }
    base.daemon.log_level = overlay.daemon.log_level;
    base.issuance = overlay.issuance;
    base.rotation = overlay.rotation;
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("TUNNELKEY_API_URL") {
        config.issuance.api_url = val;
    }
    if let Ok(val) = std::env::var("TUNNELKEY_HTTP_TIMEOUT_SECS") {
        if let Ok(n) = val.parse() {
            config.issuance.http_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("TUNNELKEY_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Ok(val) = std::env::var("TUNNELKEY_SETTINGS_PATH") {
        config.daemon.settings_path = Some(PathBuf::from(val));
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.issuance.api_url.is_empty() {
        return Err(Error::Config("issuance.api_url is empty".into()));
    }
    if config.rotation.default_interval_secs == 0 {
        return Err(Error::Config(
            "rotation.default_interval_secs must be positive".into(),
        ));
    }
    Ok(())
}
