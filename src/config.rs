//! # Configuration Management
//!
//! Centralized configuration for the driver.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()` (`IPROTO_*`)
//! - Direct instantiation with defaults
//!
//! ## Notes
//! - Credentials are optional; without them the session stays `guest`
//! - Timeouts are optional; `None` means block until the peer answers
//! - Durations are written as milliseconds

use crate::error::{IprotoError, Result};
use crate::transport::tcp::{TcpOptions, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default largest response payload accepted (the wire maximum)
pub const MAX_PACKET_SIZE: usize = i32::MAX as usize;

/// Main driver configuration containing all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DriverConfig {
    /// Connection settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| IprotoError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| IprotoError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| IprotoError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("IPROTO_HOST") {
            config.client.host = host;
        }

        if let Ok(port) = std::env::var("IPROTO_PORT") {
            config.client.port = port
                .parse::<u16>()
                .map_err(|_| IprotoError::ConfigError(format!("Invalid IPROTO_PORT: {port}")))?;
        }

        if let Ok(username) = std::env::var("IPROTO_USERNAME") {
            config.client.username = Some(username);
        }

        if let Ok(password) = std::env::var("IPROTO_PASSWORD") {
            config.client.password = Some(password);
        }

        if let Ok(timeout) = std::env::var("IPROTO_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Some(Duration::from_millis(val));
            }
        }

        if let Ok(timeout) = std::env::var("IPROTO_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.read_timeout = Some(Duration::from_millis(val));
                config.client.write_timeout = Some(Duration::from_millis(val));
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| IprotoError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| IprotoError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(IprotoError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Connection settings. Missing fields take their defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP address
    pub host: String,

    /// Server port
    pub port: u16,

    /// User to authenticate as right after connecting
    pub username: Option<String>,

    /// Password for `username`
    pub password: Option<String>,

    /// Timeout for the TCP connect
    #[serde(with = "opt_duration_serde")]
    pub connect_timeout: Option<Duration>,

    /// Timeout for each blocking read
    #[serde(with = "opt_duration_serde")]
    pub read_timeout: Option<Duration>,

    /// Timeout for each blocking write
    #[serde(with = "opt_duration_serde")]
    pub write_timeout: Option<Duration>,

    /// Largest response payload accepted, in bytes
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: None,
            write_timeout: None,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl ClientConfig {
    /// Config for `host:port` with default settings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set credentials used right after connecting
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Socket options derived from the timeouts
    pub fn tcp_options(&self) -> TcpOptions {
        TcpOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }

    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("Host cannot be empty".to_string());
        }

        if self.port == 0 {
            errors.push("Port must be greater than 0".to_string());
        }

        match (&self.username, &self.password) {
            (Some(user), _) if user.is_empty() => {
                errors.push("Username cannot be empty when set".to_string());
            }
            (None, Some(_)) => {
                errors.push("Password is set but username is missing".to_string());
            }
            _ => {}
        }

        for (name, timeout) in [
            ("Connect", self.connect_timeout),
            ("Read", self.read_timeout),
            ("Write", self.write_timeout),
        ] {
            if let Some(timeout) = timeout {
                if timeout.is_zero() {
                    errors.push(format!("{name} timeout cannot be zero"));
                } else if timeout.as_secs() > 3600 {
                    errors.push(format!("{name} timeout too long (maximum: 1 hour)"));
                }
            }
        }

        if self.max_packet_size < 1024 {
            errors.push("Max packet size too small (minimum: 1 KB)".to_string());
        } else if self.max_packet_size > MAX_PACKET_SIZE {
            errors.push(format!(
                "Max packet size too large: {} bytes (wire maximum: {MAX_PACKET_SIZE})",
                self.max_packet_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("iproto-client"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for optional Duration serialization as milliseconds
mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
