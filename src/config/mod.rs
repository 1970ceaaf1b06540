//! Configuration Module
//!
//! Provides TOML-based configuration for the bridge with support for:
//! - Broker settings (host, port, client id, timings)
//! - Trust material paths (CA, client certificate, private key)
//! - CAN interface selection
//! - Environment variable overrides (CANBRIDGE_* prefix)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker connection configuration
    pub broker: BrokerConfig,
    /// Trust material configuration
    pub tls: TlsConfig,
    /// CAN bus configuration
    pub can: CanConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or IP (required, no default)
    pub host: Option<String>,
    /// Broker TLS port
    #[serde(default = "default_port")]
    pub port: u16,
    /// MQTT client identifier (default: canbridge-<pid>)
    pub client_id: Option<String>,
    /// Keepalive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Initial reconnect backoff in seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Reconnect backoff ceiling in seconds
    #[serde(default = "default_max_reconnect_interval")]
    pub max_reconnect_interval: u64,
}

fn default_port() -> u16 {
    8883
}
fn default_keep_alive() -> u16 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_reconnect_interval() -> u64 {
    1
}
fn default_max_reconnect_interval() -> u64 {
    60
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            client_id: None,
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
        }
    }
}

impl BrokerConfig {
    /// Get connect timeout as Duration
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Get reconnect interval as Duration
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    /// Get reconnect ceiling as Duration
    pub fn max_reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval)
    }
}

/// Trust material configuration.
///
/// All three paths are required; the bridge refuses to start without full
/// mutual authentication material.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to CA certificate file (PEM format)
    pub cafile: Option<String>,
    /// Path to client certificate file (PEM format)
    pub cert: Option<String>,
    /// Path to client private key file (PEM format)
    pub key: Option<String>,
}

/// CAN bus configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    /// SocketCAN interface name
    #[serde(default = "default_can_interface")]
    pub interface: String,
}

fn default_can_interface() -> String {
    "can0".to_string()
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            interface: default_can_interface(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `CANBRIDGE__` prefix with double underscores for nesting:
    ///    - `CANBRIDGE__BROKER__HOST=broker.fleet.local` overrides `broker.host`
    ///    - `CANBRIDGE__CAN__INTERFACE=vcan0` overrides `can.interface`
    ///    - `CANBRIDGE__TLS__CAFILE=/etc/bridge/ca.crt` overrides `tls.cafile`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("broker.port", 8883)?
            .set_default("broker.keep_alive", 60)?
            .set_default("broker.connect_timeout", 10)?
            .set_default("broker.reconnect_interval", 1)?
            .set_default("broker.max_reconnect_interval", 60)?
            .set_default("can.interface", "can0")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (CANBRIDGE__BROKER__HOST, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("CANBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// The required fields (broker host and the three trust paths) may still
    /// arrive from the command line, so absence is not checked here; only
    /// values that are present are validated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref host) = self.broker.host {
            if host.is_empty() {
                return Err(ConfigError::Validation(
                    "broker.host must not be empty".to_string(),
                ));
            }
        }

        if self.broker.port == 0 {
            return Err(ConfigError::Validation(
                "broker.port must be non-zero".to_string(),
            ));
        }

        if self.broker.keep_alive == 0 {
            return Err(ConfigError::Validation(
                "broker.keep_alive must be at least 1 second".to_string(),
            ));
        }

        if self.broker.reconnect_interval == 0 {
            return Err(ConfigError::Validation(
                "broker.reconnect_interval must be at least 1 second".to_string(),
            ));
        }

        if self.broker.reconnect_interval > self.broker.max_reconnect_interval {
            return Err(ConfigError::Validation(
                "broker.reconnect_interval exceeds broker.max_reconnect_interval".to_string(),
            ));
        }

        if self.can.interface.is_empty() {
            return Err(ConfigError::Validation(
                "can.interface must not be empty".to_string(),
            ));
        }

        for (field, value) in [
            ("tls.cafile", &self.tls.cafile),
            ("tls.cert", &self.tls.cert),
            ("tls.key", &self.tls.key),
        ] {
            if let Some(path) = value {
                if path.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "{} must not be empty",
                        field
                    )));
                }
            }
        }

        Ok(())
    }
}
