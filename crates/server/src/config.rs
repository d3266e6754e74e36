//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub serial: SerialConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Path::new("config.toml");
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No config.toml found, creating default config");
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }
}

/// WebSocket listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connections per IP limit.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
        }
    }
}

fn default_port() -> u16 {
    3000
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_ip_limit() -> usize {
    16
}

/// Room registry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomsConfig {
    /// Hard cap on concurrently registered rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,
    /// Drop memberless rooms idle for this long, in seconds (0 disables).
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_rooms: default_max_rooms(),
            idle_ttl_secs: default_idle_ttl(),
        }
    }
}

fn default_max_rooms() -> usize {
    1024
}
fn default_idle_ttl() -> u64 {
    3600
}

/// TUIO tracking listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackingConfig {
    #[serde(default = "default_tracking_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// UDP port of the OSC stream.
    #[serde(default = "default_tracking_port")]
    pub port: u16,
    /// Minimum interval between snapshot publications, in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Defensive cap on tracked entities per class.
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: default_tracking_enabled(),
            bind: default_bind(),
            port: default_tracking_port(),
            throttle_ms: default_throttle_ms(),
            max_entities: default_max_entities(),
        }
    }
}

fn default_tracking_enabled() -> bool {
    true
}
fn default_tracking_port() -> u16 {
    3333
}
fn default_throttle_ms() -> u64 {
    16
}
fn default_max_entities() -> usize {
    256
}

/// Serial line bridge settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    /// Device paths to read lines from. Empty disables the bridge.
    #[serde(default)]
    pub devices: Vec<String>,
    /// Line delimiter (first byte is used).
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            delimiter: default_delimiter(),
        }
    }
}

fn default_delimiter() -> String {
    "\n".to_string()
}
