//! Panel Configuration
//!
//! Loaded from TOML or JSON. Every field has a default, so an empty file
//! is a valid configuration.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [daemon]
//! interface = "wg0"
//!
//! [relay]
//! endpoint = "https://relays.example.net/v1/relays"
//! target = { name = "Raleigh, NC", latitude = 35.7796, longitude = -78.6382 }
//! ```

use crate::credentials::DiscoveryOptions;
use crate::export::ExportOptions;
use crate::registry::RegistryOptions;
use crate::relay::TargetRegion;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete panel configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub export: ExportOptions,
}

/// HTTP surface and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// How often usage counters are flushed to disk
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Peer registry rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_true")]
    pub enforce_unique_keys: bool,
    #[serde(default = "default_true")]
    pub enforce_unique_addresses: bool,
    /// A peer counts as active if seen within this many seconds
    #[serde(default = "default_activity_window")]
    pub activity_window_secs: u64,
}

/// Tunnel daemon control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    /// argv used to bring the tunnel up; defaults to `wg-quick up <interface>`
    #[serde(default)]
    pub up_command: Option<Vec<String>>,
    /// argv used to take the tunnel down; defaults to `wg-quick down <interface>`
    #[serde(default)]
    pub down_command: Option<Vec<String>>,
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,
    /// Skip running commands entirely
    #[serde(default)]
    pub dry_run: bool,
    /// Capacity of the daemon report queue
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Upstream relay discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_relay_limit")]
    pub limit: usize,
    #[serde(default)]
    pub target: TargetRegion,
}

fn default_true() -> bool {
    true
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_persist_interval() -> u64 {
    30
}

fn default_activity_window() -> u64 {
    60
}

fn default_interface() -> String {
    "wg0".to_string()
}

fn default_launch_timeout() -> u64 {
    15
}

fn default_event_buffer() -> usize {
    1024
}

fn default_relay_endpoint() -> String {
    "https://api.protonvpn.ch/vpn/logicals".to_string()
}

fn default_relay_timeout() -> u64 {
    10
}

fn default_relay_limit() -> usize {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            state_dir: default_state_dir(),
            persist_interval_secs: default_persist_interval(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enforce_unique_keys: true,
            enforce_unique_addresses: true,
            activity_window_secs: default_activity_window(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            up_command: None,
            down_command: None,
            launch_timeout_secs: default_launch_timeout(),
            dry_run: false,
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_relay_endpoint(),
            timeout_secs: default_relay_timeout(),
            limit: default_relay_limit(),
            target: TargetRegion::default(),
        }
    }
}

impl PanelConfig {
    /// Load from a file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => Self::from_toml(&content),
            "json" => Self::from_json(&content),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.persist_interval_secs == 0 {
            return Err(ConfigError::Invalid("server.persist_interval_secs must be > 0"));
        }
        if self.registry.activity_window_secs == 0 {
            return Err(ConfigError::Invalid("registry.activity_window_secs must be > 0"));
        }
        if self.daemon.launch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("daemon.launch_timeout_secs must be > 0"));
        }
        if self.daemon.event_buffer == 0 {
            return Err(ConfigError::Invalid("daemon.event_buffer must be > 0"));
        }
        let empty = |cmd: &Option<Vec<String>>| cmd.as_ref().is_some_and(|argv| argv.is_empty());
        if empty(&self.daemon.up_command) || empty(&self.daemon.down_command) {
            return Err(ConfigError::Invalid("daemon commands must not be empty"));
        }
        if self.relay.timeout_secs == 0 {
            return Err(ConfigError::Invalid("relay.timeout_secs must be > 0"));
        }
        if self.relay.limit == 0 {
            return Err(ConfigError::Invalid("relay.limit must be > 0"));
        }
        if !self.relay.target.is_valid() {
            return Err(ConfigError::Invalid("relay.target coordinates out of range"));
        }
        Ok(())
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            enforce_unique_keys: self.registry.enforce_unique_keys,
            enforce_unique_addresses: self.registry.enforce_unique_addresses,
        }
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.registry.activity_window_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.launch_timeout_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.server.persist_interval_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.timeout_secs)
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            target: self.relay.target.clone(),
            timeout: self.relay_timeout(),
            limit: self.relay.limit,
        }
    }

    /// Daemon up/down argv, falling back to wg-quick
    pub fn daemon_commands(&self) -> (Vec<String>, Vec<String>) {
        let interface = &self.daemon.interface;
        let up = self
            .daemon
            .up_command
            .clone()
            .unwrap_or_else(|| vec!["wg-quick".into(), "up".into(), interface.clone()]);
        let down = self
            .daemon
            .down_command
            .clone()
            .unwrap_or_else(|| vec!["wg-quick".into(), "down".into(), interface.clone()]);
        (up, down)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format: {0:?}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
