//! TOML configuration for the bridge runtime.
//!
//! Every field has a serde default, so a missing file, an empty file, or a
//! file written by an older version all load.  Example:
//!
//! ```toml
//! [network]
//! session_port = 5000
//! discovery_port = 5001
//!
//! [provisioning]
//! timeout_ms = 30000
//!
//! [bridge]
//! queue_capacity = 8192
//!
//! [[channels.serial]]
//! name = "uart1"
//! max_payload = 4096
//! ```
//!
//! Durations are stored as integer milliseconds (`*_ms`) and exposed as
//! [`Duration`] through accessor methods.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ndl_core::protocol::envelope::{HEADER_SIZE, MAX_WIRE_PAYLOAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parse but cannot work together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub provisioning: ProvisioningSection,
    #[serde(default)]
    pub channels: ChannelsSection,
    #[serde(default)]
    pub simulation: SimulationSection,
}

/// Queues, task periods and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Capacity in bytes of each bridge queue.  Must hold one envelope of
    /// the largest channel payload.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_task_period_ms")]
    pub serial_poll_ms: u64,
    #[serde(default = "default_task_period_ms")]
    pub host_flush_ms: u64,
    /// Most bytes popped from the host-bound queue per flush.
    #[serde(default = "default_flush_batch")]
    pub flush_batch: usize,
    /// Bounded wait for a serial write.
    #[serde(default = "default_serial_write_wait_ms")]
    pub serial_write_wait_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_status_period_ms")]
    pub status_period_ms: u64,
    /// Delay before retrying after a setup failure.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_button_debounce_ms")]
    pub button_debounce_ms: u64,
}

/// Discovery and session sockets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// TCP port the session connects to on the peer.
    #[serde(default = "default_session_port")]
    pub session_port: u16,
    /// UDP port the discovery listener binds.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_discovery_recv_timeout_ms")]
    pub discovery_recv_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound on one wait of the session loop.
    #[serde(default = "default_task_period_ms")]
    pub session_poll_ms: u64,
    /// Most bytes popped from the network-bound queue per send.
    #[serde(default = "default_send_batch")]
    pub send_batch: usize,
    /// Silence on the session socket before the first keep-alive packet.
    #[serde(default = "default_keepalive_idle_ms")]
    pub keepalive_idle_ms: u64,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Unanswered keep-alive packets before the session is dropped.
    #[serde(default = "default_keepalive_retries")]
    pub keepalive_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisioningSection {
    #[serde(default = "default_provisioning_timeout_ms")]
    pub timeout_ms: u64,
    /// Length of one bounded wait for credentials.
    #[serde(default = "default_provisioning_poll_ms")]
    pub poll_interval_ms: u64,
}

/// A serial channel and its topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelEntry {
    pub name: String,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelsSection {
    /// The host-facing channel.
    #[serde(default = "default_host_channel")]
    pub host: ChannelEntry,
    #[serde(default = "default_serial_channels")]
    pub serial: Vec<ChannelEntry>,
}

/// Behaviour of the in-memory adapters used by the binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSection {
    /// Whether the simulated radio boots already associated.
    #[serde(default)]
    pub start_associated: bool,
    #[serde(default = "default_sim_ssid")]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    /// Delay between simulated transport events.
    #[serde(default = "default_sim_event_delay_ms")]
    pub event_delay_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_queue_capacity() -> usize {
    8192
}
fn default_flush_batch() -> usize {
    4096
}
fn default_task_period_ms() -> u64 {
    2
}
fn default_serial_write_wait_ms() -> u64 {
    20
}
fn default_heartbeat_ms() -> u64 {
    1000
}
fn default_status_period_ms() -> u64 {
    50
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_button_debounce_ms() -> u64 {
    50
}
fn default_session_port() -> u16 {
    5000
}
fn default_discovery_port() -> u16 {
    5001
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_discovery_recv_timeout_ms() -> u64 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_send_batch() -> usize {
    1024
}
fn default_keepalive_idle_ms() -> u64 {
    5000
}
fn default_keepalive_interval_ms() -> u64 {
    1000
}
fn default_keepalive_retries() -> u32 {
    5
}
fn default_provisioning_timeout_ms() -> u64 {
    30_000
}
fn default_provisioning_poll_ms() -> u64 {
    500
}
fn default_max_payload() -> usize {
    4096
}
fn default_host_channel() -> ChannelEntry {
    ChannelEntry {
        name: "uart_cdc".to_string(),
        max_payload: default_max_payload(),
    }
}
fn default_serial_channels() -> Vec<ChannelEntry> {
    ["uart1", "uart2"]
        .into_iter()
        .map(|name| ChannelEntry {
            name: name.to_string(),
            max_payload: default_max_payload(),
        })
        .collect()
}
fn default_sim_ssid() -> String {
    "ndl-sim".to_string()
}
fn default_sim_event_delay_ms() -> u64 {
    500
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            queue_capacity: default_queue_capacity(),
            serial_poll_ms: default_task_period_ms(),
            host_flush_ms: default_task_period_ms(),
            flush_batch: default_flush_batch(),
            serial_write_wait_ms: default_serial_write_wait_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            status_period_ms: default_status_period_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            button_debounce_ms: default_button_debounce_ms(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            session_port: default_session_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            discovery_recv_timeout_ms: default_discovery_recv_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            session_poll_ms: default_task_period_ms(),
            send_batch: default_send_batch(),
            keepalive_idle_ms: default_keepalive_idle_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            keepalive_retries: default_keepalive_retries(),
        }
    }
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_provisioning_timeout_ms(),
            poll_interval_ms: default_provisioning_poll_ms(),
        }
    }
}

impl Default for ChannelsSection {
    fn default() -> Self {
        Self {
            host: default_host_channel(),
            serial: default_serial_channels(),
        }
    }
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            start_associated: false,
            ssid: default_sim_ssid(),
            password: String::new(),
            event_delay_ms: default_sim_event_delay_ms(),
        }
    }
}

// ── Duration accessors ────────────────────────────────────────────────────────

impl BridgeSection {
    pub fn serial_poll_period(&self) -> Duration {
        Duration::from_millis(self.serial_poll_ms)
    }
    pub fn host_flush_period(&self) -> Duration {
        Duration::from_millis(self.host_flush_ms)
    }
    pub fn serial_write_wait(&self) -> Duration {
        Duration::from_millis(self.serial_write_wait_ms)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
    pub fn status_period(&self) -> Duration {
        Duration::from_millis(self.status_period_ms)
    }
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
    pub fn button_debounce(&self) -> Duration {
        Duration::from_millis(self.button_debounce_ms)
    }
}

impl NetworkSection {
    pub fn discovery_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_recv_timeout_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn session_poll(&self) -> Duration {
        Duration::from_millis(self.session_poll_ms)
    }
    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_millis(self.keepalive_idle_ms)
    }
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl ProvisioningSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl BridgeConfig {
    /// Checks values that parse individually but cannot work together.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let all = std::iter::once(&self.channels.host).chain(self.channels.serial.iter());
        for channel in all {
            if !names.insert(channel.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "channel '{}' is listed twice",
                    channel.name
                )));
            }
            if channel.max_payload == 0 || channel.max_payload > MAX_WIRE_PAYLOAD {
                return Err(ConfigError::Invalid(format!(
                    "channel '{}' max_payload must be 1..={MAX_WIRE_PAYLOAD}",
                    channel.name
                )));
            }
            let envelope = channel.max_payload + HEADER_SIZE;
            if self.bridge.queue_capacity < envelope {
                return Err(ConfigError::Invalid(format!(
                    "bridge.queue_capacity {} cannot hold a full envelope of channel '{}' \
                     ({envelope} bytes)",
                    self.bridge.queue_capacity, channel.name
                )));
            }
        }
        for (name, value) in [
            ("bridge.serial_poll_ms", self.bridge.serial_poll_ms),
            ("bridge.host_flush_ms", self.bridge.host_flush_ms),
            ("bridge.heartbeat_ms", self.bridge.heartbeat_ms),
            ("bridge.status_period_ms", self.bridge.status_period_ms),
            ("bridge.flush_batch", self.bridge.flush_batch as u64),
            ("network.session_poll_ms", self.network.session_poll_ms),
            ("network.send_batch", self.network.send_batch as u64),
            ("network.discovery_recv_timeout_ms", self.network.discovery_recv_timeout_ms),
            ("network.connect_timeout_ms", self.network.connect_timeout_ms),
            ("network.keepalive_idle_ms", self.network.keepalive_idle_ms),
            ("network.keepalive_interval_ms", self.network.keepalive_interval_ms),
            ("network.keepalive_retries", u64::from(self.network.keepalive_retries)),
            ("provisioning.timeout_ms", self.provisioning.timeout_ms),
            ("provisioning.poll_interval_ms", self.provisioning.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Loads the configuration at `path`, returning defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &BridgeConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
