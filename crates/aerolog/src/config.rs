//! Configuration management for aerolog.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "aerolog";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "logbook.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `AEROLOG_`)
/// 2. TOML config file at `~/.config/aerolog/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote gateway configuration.
    pub gateway: GatewayConfig,
    /// Sync engine configuration.
    pub sync: SyncConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Devices to synchronize.
    pub devices: Vec<DeviceConfig>,
}

/// Remote gateway connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the device gateway.
    pub base_url: String,
    /// Account used for gateway authentication.
    pub username: String,
    /// Password used for gateway authentication.
    pub password: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Sync engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between sync cycles in seconds.
    pub interval_secs: u64,
    /// Minimum number of recent events replayed through the reconstructor
    /// each cycle. The effective window is `max(min_lookback, 2 * new)`.
    pub min_lookback: usize,
    /// Maximum number of devices synced concurrently.
    pub max_concurrent: usize,
    /// Takeoff clock time assumed for legacy records that only carry a
    /// total flight duration, as `HH:MM`.
    pub default_takeoff_time: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/aerolog/logbook.db`
    pub database_path: Option<PathBuf>,
}

/// A device to synchronize from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable device name (unique).
    pub name: String,
    /// Device identifier on the remote gateway.
    pub external_id: String,
    /// Whether this device is synced.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:8088".to_string(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            min_lookback: 20,
            max_concurrent: 4,
            default_takeoff_time: "10:00".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("AEROLOG_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.gateway.base_url.starts_with("http://")
            && !self.gateway.base_url.starts_with("https://")
        {
            return Err(Error::ConfigValidation {
                message: format!("gateway.base_url must be http(s): {}", self.gateway.base_url),
            });
        }

        if self.gateway.timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "gateway.timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.interval_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.min_lookback == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.min_lookback must be greater than 0".to_string(),
            });
        }

        if self.sync.max_concurrent == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.max_concurrent must be greater than 0".to_string(),
            });
        }

        if NaiveTime::parse_from_str(&self.sync.default_takeoff_time, "%H:%M").is_err() {
            return Err(Error::ConfigValidation {
                message: format!(
                    "sync.default_takeoff_time is not a valid HH:MM time: {}",
                    self.sync.default_takeoff_time
                ),
            });
        }

        for device in &self.devices {
            if device.name.is_empty() || device.external_id.is_empty() {
                return Err(Error::ConfigValidation {
                    message: "each device needs a non-empty name and external_id".to_string(),
                });
            }
        }

        let mut names: Vec<&str> = self.devices.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.devices.len() {
            return Err(Error::ConfigValidation {
                message: "device names must be unique".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the sync interval as a Duration.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// Get the gateway request timeout as a Duration.
    #[must_use]
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs)
    }

    /// Get the default takeoff clock time for legacy duration-only records.
    ///
    /// Validation guarantees the configured string parses; a default is used
    /// if it somehow does not.
    #[must_use]
    pub fn default_takeoff_time(&self) -> NaiveTime {
        NaiveTime::parse_from_str(&self.sync.default_takeoff_time, "%H:%M")
            .unwrap_or_else(|_| NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.min_lookback, 20);
        assert_eq!(config.sync.max_concurrent, 4);
        assert_eq!(config.gateway.timeout_secs, 30);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = Config::default();
        config.gateway.base_url = "ftp://example.com".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("base_url"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.sync.interval_secs = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("interval_secs"));
    }

    #[test]
    fn test_validate_zero_lookback() {
        let mut config = Config::default();
        config.sync.min_lookback = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_default_takeoff_time() {
        let mut config = Config::default();
        config.sync.default_takeoff_time = "25:99".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("default_takeoff_time"));
    }

    #[test]
    fn test_validate_duplicate_device_names() {
        let mut config = Config::default();
        config.devices = vec![
            DeviceConfig {
                name: "OH-CPT".to_string(),
                external_id: "a1".to_string(),
                active: true,
            },
            DeviceConfig {
                name: "OH-CPT".to_string(),
                external_id: "a2".to_string(),
                active: true,
            },
        ];

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unique"));
    }

    #[test]
    fn test_validate_empty_external_id() {
        let mut config = Config::default();
        config.devices = vec![DeviceConfig {
            name: "OH-CPT".to_string(),
            external_id: String::new(),
            active: true,
        }];

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("logbook.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_sync_interval() {
        let config = Config::default();
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_gateway_timeout() {
        let config = Config::default();
        assert_eq!(config.gateway_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_takeoff_time() {
        let config = Config::default();
        assert_eq!(
            config.default_takeoff_time(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("aerolog"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_device_config_deserialize_defaults_active() {
        let json = r#"{"name": "OH-CPT", "external_id": "abc-123"}"#;
        let device: DeviceConfig = serde_json::from_str(json).unwrap();
        assert!(device.active);
    }

    #[test]
    fn test_sync_config_deserialize() {
        let json = r#"{"interval_secs": 60, "min_lookback": 50}"#;
        let sync: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(sync.interval_secs, 60);
        assert_eq!(sync.min_lookback, 50);
        // Unspecified fields fall back to defaults
        assert_eq!(sync.max_concurrent, 4);
    }

    #[test]
    fn test_gateway_config_serialize() {
        let gateway = GatewayConfig::default();
        let json = serde_json::to_string(&gateway).unwrap();
        assert!(json.contains("base_url"));
        assert!(json.contains("timeout_secs"));
    }
}
