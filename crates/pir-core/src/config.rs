//! Configuration management for the PIR sensor bridge.
//!
//! This module provides the configuration system, which supports:
//! - Loading from YAML files
//! - Environment variable overrides
//! - Validation of all settings
//! - Discovery, device defaults, connection transport, logging, and host settings

use crate::discovery_config::DiscoveryConfig;
use crate::error::{ConfigError, Result};
use crate::types::DEFAULT_NO_MOTION_DELAY_MS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Prefix for environment variable overrides (`PIR_BRIDGE__DEVICES__NO_MOTION_DELAY_MS=...`).
pub const ENV_PREFIX: &str = "PIR_BRIDGE";

/// Main application configuration.
///
/// # Examples
///
/// ```
/// use pir_core::config::AppConfig;
///
/// let config = AppConfig::from_yaml("devices:\n  no_motion_delay_ms: 15000\n").unwrap();
/// assert_eq!(config.devices.no_motion_delay_ms, 15000);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Discovery coordinator settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Defaults applied to every discovered device
    #[serde(default)]
    pub devices: DeviceDefaults,

    /// Device connection transport settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Host application settings
    #[serde(default)]
    pub host: HostConfig,
}

impl AppConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, layering environment
    /// variable overrides (`PIR_BRIDGE__*`) on top of an optional file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or merged.
    pub fn from_config_builder<P: AsRef<Path>>(path: P, required: bool) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any section is inconsistent.
    pub fn validate(&self) -> Result<()> {
        self.discovery
            .validate()
            .map_err(ConfigError::validation_failed)?;
        self.devices.validate()?;
        self.connection.validate()?;
        self.logging.parse_level()?;
        Ok(())
    }
}

/// Defaults applied to discovered devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefaults {
    /// Quiescence delay forwarded to devices that do not advertise their own
    #[serde(default = "default_no_motion_delay")]
    pub no_motion_delay_ms: u64,
}

fn default_no_motion_delay() -> u64 {
    DEFAULT_NO_MOTION_DELAY_MS
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            no_motion_delay_ms: default_no_motion_delay(),
        }
    }
}

impl DeviceDefaults {
    /// Validates the device defaults.
    pub fn validate(&self) -> Result<()> {
        if self.no_motion_delay_ms == 0 {
            return Err(ConfigError::invalid_value(
                "devices.no_motion_delay_ms",
                "quiescence delay cannot be 0",
            )
            .into());
        }
        Ok(())
    }
}

/// Transport settings for device connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Upper bound for the websocket handshake (milliseconds)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Interval between keepalive pings (seconds, 0 disables keepalive)
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

fn default_handshake_timeout() -> u64 {
    2000
}

fn default_keepalive_interval() -> u64 {
    10
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl ConnectionConfig {
    /// Returns the handshake timeout as a Duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Returns the keepalive interval, or None when keepalive is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0)
            .then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Validates the connection settings.
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "connection.handshake_timeout_ms",
                "timeout cannot be 0",
            )
            .into());
        }
        self.reconnect.validate()
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// First delay after a failed or dropped connection (milliseconds)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum delay between attempts (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Multiplier applied per consecutive failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectSettings {
    /// Validates the backoff settings.
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::invalid_value(
                "connection.reconnect.initial_backoff_ms",
                "backoff cannot be 0",
            )
            .into());
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::invalid_value(
                "connection.reconnect.max_backoff_ms",
                "must be at least initial_backoff_ms",
            )
            .into());
        }

        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid_value(
                "connection.reconnect.backoff_multiplier",
                "must be >= 1.0",
            )
            .into());
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

/// Host application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// File where the host keeps its registered accessories between runs
    #[serde(default)]
    pub accessory_cache: Option<PathBuf>,
}
