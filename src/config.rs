//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working agent that only keeps the node's clock in sync and answers channel
//! commands. Polling starts once a repeater public key prefix is configured.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AgentError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub repeater: RepeaterConfig,
    pub output: OutputConfig,
    pub commands: CommandConfig,
    pub setup: SetupConfig,
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// What a poll cycle retrieves from the repeater
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Operational counters, one CSV row per cycle
    #[default]
    Status,
    /// Cayenne LPP sensor readings
    Telemetry,
}

impl std::str::FromStr for PollMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "telemetry" => Ok(Self::Telemetry),
            other => Err(AgentError::InvalidArgument(format!(
                "unknown poll mode '{}' (expected 'status' or 'telemetry')",
                other
            ))),
        }
    }
}

/// Remote repeater polling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RepeaterConfig {
    /// Hex public key prefix; empty disables polling
    #[serde(default)]
    pub public_key_prefix: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default)]
    pub mode: PollMode,
}

/// Output sink configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub csv_path: Option<PathBuf>,
}

/// Channel command responder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CommandConfig {
    #[serde(default = "default_commands_enabled")]
    pub enabled: bool,

    #[serde(default = "default_ping_token")]
    pub ping: String,

    #[serde(default = "default_date_token")]
    pub date: String,
}

/// Post-connect setup steps
#[derive(Debug, Deserialize, Clone)]
pub struct SetupConfig {
    #[serde(default = "default_true")]
    pub device_query: bool,

    #[serde(default = "default_true")]
    pub sync_clock: bool,

    #[serde(default = "default_true")]
    pub list_contacts: bool,

    #[serde(default = "default_true")]
    pub list_channels: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_request_timeout_ms() -> u64 { 30000 }
fn default_reconnect_interval_ms() -> u64 { 3000 }

fn default_interval_minutes() -> u64 { 15 }

fn default_commands_enabled() -> bool { true }
fn default_ping_token() -> String { ".ping".to_string() }
fn default_date_token() -> String { ".date".to_string() }

fn default_true() -> bool { true }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            public_key_prefix: String::new(),
            password: String::new(),
            interval_minutes: default_interval_minutes(),
            mode: PollMode::default(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enabled: default_commands_enabled(),
            ping: default_ping_token(),
            date: default_date_token(),
        }
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            device_query: true,
            sync_clock: true,
            list_contacts: true,
            list_channels: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl SerialConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl RepeaterConfig {
    /// Whether a repeater target is configured
    pub fn is_enabled(&self) -> bool {
        !self.public_key_prefix.trim().is_empty()
    }

    /// Decoded public key prefix bytes
    pub fn prefix_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.public_key_prefix.trim()).map_err(|e| {
            AgentError::InvalidArgument(format!(
                "public_key_prefix '{}' is not valid hex: {}",
                self.public_key_prefix, e
            ))
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use meshcore_agent::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(AgentError::Config(toml::de::Error::custom(
                "serial port cannot be empty",
            )));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600]
            .contains(&self.serial.baud_rate)
        {
            return Err(AgentError::Config(toml::de::Error::custom(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            )));
        }

        if self.serial.request_timeout_ms == 0 || self.serial.request_timeout_ms > 120000 {
            return Err(AgentError::Config(toml::de::Error::custom(
                "request_timeout_ms must be between 1 and 120000",
            )));
        }

        if self.serial.reconnect_interval_ms < 100 || self.serial.reconnect_interval_ms > 600000 {
            return Err(AgentError::Config(toml::de::Error::custom(
                "reconnect_interval_ms must be between 100 and 600000",
            )));
        }

        if self.repeater.interval_minutes == 0 || self.repeater.interval_minutes > 1440 {
            return Err(AgentError::Config(toml::de::Error::custom(
                "interval_minutes must be between 1 and 1440",
            )));
        }

        if self.repeater.is_enabled() {
            let prefix = self
                .repeater
                .prefix_bytes()
                .map_err(|e| AgentError::Config(toml::de::Error::custom(e.to_string())))?;
            if prefix.len() > 32 {
                return Err(AgentError::Config(toml::de::Error::custom(
                    "public_key_prefix cannot be longer than a public key (32 bytes)",
                )));
            }
        }

        if self.commands.ping.is_empty() || self.commands.date.is_empty() {
            return Err(AgentError::Config(toml::de::Error::custom(
                "command tokens cannot be empty",
            )));
        }

        if self.commands.ping == self.commands.date {
            return Err(AgentError::Config(toml::de::Error::custom(
                "ping and date command tokens must differ",
            )));
        }

        Ok(())
    }
}
