//! # Dashboard Configuration
//!
//! TOML-backed settings for the broker connection, the subscription set and
//! the reconnect policy. A missing file degrades to defaults so the dashboard
//! starts against a local broker out of the box; a broken file does not.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use toml;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

pub use crate::mqtt::config::{BrokerSettings, Credentials, MqttConfig};

/// Environment variable that overrides the config file location
pub const CONFIG_ENV_VAR: &str = "TASMOTA_DASH_CONFIG";

const CONFIG_DIR_NAME: &str = "tasmota-dash";
const CONFIG_FILE_NAME: &str = "config.toml";
const FALLBACK_CONFIG_PATH: &str = "tasmota-dash.toml";

/// Top-level configuration file layout
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    /// Log the effective configuration at startup
    pub dump_config: bool,
    pub mqtt: MqttConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            dump_config: true,
            mqtt: MqttConfig::default(),
        }
    }
}

impl DashboardConfig {
    /// Renders the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Resolves the config file path: env override, user config dir, then cwd
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    match dirs::config_dir() {
        Some(dir) => dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
        None => {
            warn!("No user config directory, falling back to working directory");
            PathBuf::from(FALLBACK_CONFIG_PATH)
        }
    }
}

/// Loads and validates the configuration at `path`.
///
/// A missing file yields the defaults; anything unreadable or invalid is an error.
pub fn load_config(path: &Path) -> Result<DashboardConfig, ConfigError> {
    let config = if path.is_file() {
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DashboardConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Loaded configuration from {}", path.display());
        config
    } else {
        warn!(
            "Config file {} not found, using defaults. Set '{}' to point elsewhere",
            path.display(),
            CONFIG_ENV_VAR
        );
        DashboardConfig::default()
    };

    config.mqtt.validate()?;
    Ok(config)
}
