//! Tracker configuration.
//!
//! Configuration can be loaded from a YAML file, environment variables, or
//! both. Environment variables take precedence over file-based configuration.
//!
//! ```yaml
//! server:
//!   addr: "tracking.example.com"
//!   port: 5023
//!   checksum: xor
//! device:
//!   imei: "357152040915004"
//!   heartbeat_interval_secs: 30
//!   location_interval_secs: 10
//! relay:
//!   target: "127.0.0.1:8700"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vtu_protocol::{ChecksumKind, DEFAULT_PORT};
use vtu_relay::RelayTarget;

use crate::session::{ReconnectPolicy, SessionConfig};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub relay: RelayConfig,
    pub reconnect: ReconnectConfig,
}

/// Fleet server endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server hostname or IP address.
    pub addr: String,
    /// Server TCP port.
    pub port: u16,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Frame checksum algorithm expected by the server.
    pub checksum: ChecksumKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 15,
            checksum: ChecksumKind::default(),
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("VTU_SERVER_ADDR") {
            self.addr = addr;
        }
        if let Ok(port) = std::env::var("VTU_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(timeout) = std::env::var("VTU_CONNECT_TIMEOUT") {
            if let Ok(timeout) = timeout.parse() {
                self.connect_timeout_secs = timeout;
            }
        }
        if let Ok(kind) = std::env::var("VTU_CHECKSUM") {
            self.checksum = match kind.to_lowercase().as_str() {
                "crc16_x25" | "crc16" | "crc" => ChecksumKind::Crc16X25,
                _ => ChecksumKind::Xor,
            };
        }
    }
}

/// Identity and reporting cadence of the simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// 15-digit device IMEI sent in the login frame.
    pub imei: String,
    /// Seconds between heartbeat frames while online.
    pub heartbeat_interval_secs: u64,
    /// Seconds between location frames while online.
    pub location_interval_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            imei: "357152040915004".to_string(),
            heartbeat_interval_secs: 30,
            location_interval_secs: 10,
        }
    }
}

impl DeviceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn location_interval(&self) -> Duration {
        Duration::from_secs(self.location_interval_secs)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(imei) = std::env::var("VTU_IMEI") {
            self.imei = imei;
        }
        if let Ok(interval) = std::env::var("VTU_HEARTBEAT_INTERVAL") {
            if let Ok(interval) = interval.parse() {
                self.heartbeat_interval_secs = interval;
            }
        }
        if let Ok(interval) = std::env::var("VTU_LOCATION_INTERVAL") {
            if let Ok(interval) = interval.parse() {
                self.location_interval_secs = interval;
            }
        }
    }
}

/// Relay controller transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay controller endpoint. `host:port`, `tcp://host:port` or
    /// `unix:/path/to.sock`.
    pub target: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Delay between delivery attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:8700".to_string(),
            connect_timeout_secs: 5,
            retry_delay_ms: 500,
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(target) = std::env::var("VTU_RELAY_TARGET") {
            self.target = target;
        }
        if let Ok(delay) = std::env::var("VTU_RELAY_RETRY_DELAY_MS") {
            if let Ok(delay) = delay.parse() {
                self.retry_delay_ms = delay;
            }
        }
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in seconds. Doubles per failed
    /// attempt up to `max_delay_secs`.
    pub initial_delay_secs: u64,
    /// Upper bound for the retry delay, in seconds.
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(delay) = std::env::var("VTU_RECONNECT_INITIAL_DELAY") {
            if let Ok(delay) = delay.parse() {
                self.initial_delay_secs = delay;
            }
        }
        if let Ok(delay) = std::env::var("VTU_RECONNECT_MAX_DELAY") {
            if let Ok(delay) = delay.parse() {
                self.max_delay_secs = delay;
            }
        }
    }
}

impl Config {
    /// Loads configuration from defaults, then the file named by
    /// `VTU_CONFIG` (if set), then environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(path) = std::env::var("VTU_CONFIG") {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file, then applies environment
    /// variable overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.server.apply_env_overrides();
        self.device.apply_env_overrides();
        self.relay.apply_env_overrides();
        self.reconnect.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.addr.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.addr must not be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }
        if self.device.imei.len() != 15 || !self.device.imei.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::ValidationError(format!(
                "device.imei must be exactly 15 digits, got {:?}",
                self.device.imei
            )));
        }
        if self.device.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "device.heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.device.location_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "device.location_interval_secs must be positive".to_string(),
            ));
        }
        if let Err(e) = RelayTarget::parse(&self.relay.target) {
            return Err(ConfigError::ValidationError(format!(
                "relay.target is invalid: {e}"
            )));
        }
        if self.reconnect.initial_delay_secs == 0 {
            return Err(ConfigError::ValidationError(
                "reconnect.initial_delay_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.server.addr, &self.device.imei)
            .with_server_port(self.server.port)
            .with_connect_timeout(self.server.connect_timeout())
            .with_checksum(self.server.checksum)
            .with_heartbeat_interval(self.device.heartbeat_interval())
            .with_location_interval(self.device.location_interval())
            .with_reconnect(ReconnectPolicy {
                initial_delay: self.reconnect.initial_delay(),
                max_delay: self.reconnect.max_delay(),
            })
    }

    /// Runtime relay dispatcher settings derived from this configuration.
    /// Call after [`Config::validate`]; an unparsable target reports a
    /// validation error.
    pub fn relay_config(&self) -> Result<vtu_relay::RelayConfig, ConfigError> {
        let target = RelayTarget::parse(&self.relay.target)
            .map_err(|e| ConfigError::ValidationError(format!("relay.target is invalid: {e}")))?;
        Ok(vtu_relay::RelayConfig::new(target)
            .with_connect_timeout(self.relay.connect_timeout())
            .with_retry_delay(self.relay.retry_delay()))
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file {}: {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file {}: {}", path.display(), e)
            }
            ConfigError::ValidationError(e) => write!(f, "invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
