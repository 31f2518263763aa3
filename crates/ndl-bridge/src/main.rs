//! NetDebugLink bridge entry point.
//!
//! Runs the complete bridge runtime against the in-memory adapters from
//! `infrastructure::mock`: serial ports with no device behind them, a radio
//! that associates with whatever credentials it is given, an indicator that
//! logs its pattern, and a credential transport that delivers the
//! `[simulation]` credentials a moment after each handshake starts.
//!
//! Pressing Enter on stdin acts as the re-provision button.
//!
//! # Usage
//!
//! ```text
//! ndl-bridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>            TOML configuration file [default: ndl-bridge.toml]
//!   --session-port <PORT>      TCP port of the peer's session listener
//!   --discovery-port <PORT>    UDP port to listen on for the peer
//!   --log-level <FILTER>       Log filter used when RUST_LOG is unset
//!   --save-config              Write the effective configuration and exit
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config, build channel registry and queues
//!  └─ periodic tasks (scheduler)
//!       ├─ serial poll   → network-bound queue
//!       ├─ host flush    ← host-bound queue
//!       ├─ heartbeat     → host-bound queue
//!       └─ status LED
//!  └─ control loop (ConnectivityController + NetworkPhases)
//!       provisioning → discovery → session
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ndl_bridge::application::connectivity::ConnectivityController;
use ndl_bridge::application::ports::{ButtonSource, CredentialTransport, Radio, SerialPort};
use ndl_bridge::application::provisioning::ProvisioningHandshake;
use ndl_bridge::application::registry::ChannelRegistry;
use ndl_bridge::application::signal::{ButtonDebouncer, ReprovisionSignal, SharedMode};
use ndl_bridge::infrastructure::mock::{
    LoggingIndicator, ManualButton, MemorySerialPort, ScriptedTransport, SimulatedRadio,
};
use ndl_bridge::infrastructure::network::{
    BridgeSession, DiscoveryListener, KeepaliveSettings, NetworkPhases, SessionSettings,
};
use ndl_bridge::infrastructure::scheduler::{BridgeTasks, TaskSettings};
use ndl_bridge::infrastructure::storage::config::{load_config, save_config, BridgeConfig};
use ndl_core::{BridgeQueue, Topic};

/// How long shutdown waits for the control loop and for the periodic tasks
/// to notice the stop flag.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// NetDebugLink serial-to-network bridge.
#[derive(Debug, Parser)]
#[command(
    name = "ndl-bridge",
    about = "Multiplexes serial channels onto one network session",
    version
)]
struct Cli {
    /// Configuration file.  A missing file means all defaults.
    #[arg(long, default_value = "ndl-bridge.toml", env = "NDL_CONFIG")]
    config: PathBuf,

    /// TCP port of the peer's session listener.
    #[arg(long, env = "NDL_SESSION_PORT")]
    session_port: Option<u16>,

    /// UDP port to listen on for the peer's discovery datagram.
    #[arg(long, env = "NDL_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Log filter used when `RUST_LOG` is unset (e.g. `debug`).
    #[arg(long, env = "NDL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Loads the configuration file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("loading config from {}", self.config.display()))?;

        if let Some(port) = self.session_port {
            config.network.session_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(level) = self.log_level {
            config.bridge.log_level = level;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Writes `config` to `path` so later runs start from it.
fn write_config(path: &Path, config: &BridgeConfig) -> anyhow::Result<()> {
    save_config(path, config)
        .with_context(|| format!("saving config to {}", path.display()))
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Registers the host channel and every serial channel on in-memory ports.
fn build_registry(config: &BridgeConfig) -> anyhow::Result<ChannelRegistry> {
    let mut registry = ChannelRegistry::new();
    let host = &config.channels.host;
    let port: Arc<dyn SerialPort> = Arc::new(MemorySerialPort::new());
    registry
        .register_host(Topic::new(host.name.as_str(), host.max_payload), port)
        .with_context(|| format!("registering host channel '{}'", host.name))?;

    for entry in &config.channels.serial {
        let port: Arc<dyn SerialPort> = Arc::new(MemorySerialPort::new());
        registry
            .register(Topic::new(entry.name.as_str(), entry.max_payload), port)
            .with_context(|| format!("registering channel '{}'", entry.name))?;
    }
    Ok(registry)
}

/// Largest payload any channel accepts.
fn largest_payload(config: &BridgeConfig) -> usize {
    config
        .channels
        .serial
        .iter()
        .map(|c| c.max_payload)
        .chain(std::iter::once(config.channels.host.max_payload))
        .max()
        .unwrap_or(config.channels.host.max_payload)
}

fn discovery_bind_addr(config: &BridgeConfig) -> anyhow::Result<SocketAddr> {
    format!(
        "{}:{}",
        config.network.bind_address, config.network.discovery_port
    )
    .parse()
    .with_context(|| {
        format!(
            "invalid discovery bind address: '{}:{}'",
            config.network.bind_address, config.network.discovery_port
        )
    })
}

/// Each line on stdin is one button press.
fn spawn_stdin_button(button: Arc<ManualButton>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(_)) => {
                    if !button.press() {
                        warn!("button press ignored: button not armed");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin closed: {e}");
                    break;
                }
            }
        }
    });
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let save_only = cli.save_config;
    let config = cli.into_bridge_config()?;

    // `RUST_LOG` wins over the configured level.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.bridge.log_level)
            .with_context(|| format!("invalid log level '{}'", config.bridge.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if save_only {
        write_config(&config_path, &config)?;
        info!("configuration written to {}", config_path.display());
        return Ok(());
    }

    info!(
        "NetDebugLink bridge starting: session port {}, discovery port {}",
        config.network.session_port, config.network.discovery_port
    );

    let running = Arc::new(AtomicBool::new(true));
    let signal = Arc::new(ReprovisionSignal::new());
    let mode = Arc::new(SharedMode::new());

    let registry = Arc::new(build_registry(&config)?);
    let to_network = Arc::new(BridgeQueue::new(
        "network-bound",
        config.bridge.queue_capacity,
    ));
    let to_host = Arc::new(BridgeQueue::new("host-bound", config.bridge.queue_capacity));
    let max_payload = largest_payload(&config);

    // ── Simulated hardware ────────────────────────────────────────────────────
    let radio: Arc<dyn Radio> = Arc::new(SimulatedRadio::new(config.simulation.start_associated));
    let transport: Arc<dyn CredentialTransport> = Arc::new(ScriptedTransport::delivering(
        &config.simulation.ssid,
        &config.simulation.password,
        Duration::from_millis(config.simulation.event_delay_ms),
    ));
    let indicator = Arc::new(LoggingIndicator::new());

    let button = Arc::new(ManualButton::new());
    let debouncer = ButtonDebouncer::new(config.bridge.button_debounce(), Arc::clone(&signal));
    button.on_edge(Box::new(move || {
        debouncer.on_edge();
    }));
    button.enable();
    spawn_stdin_button(Arc::clone(&button));

    // ── Periodic tasks ────────────────────────────────────────────────────────
    let tasks = BridgeTasks {
        registry: Arc::clone(&registry),
        to_network: Arc::clone(&to_network),
        to_host: Arc::clone(&to_host),
        indicator,
        mode: Arc::clone(&mode),
    }
    .spawn(
        &TaskSettings {
            serial_poll: config.bridge.serial_poll_period(),
            host_flush: config.bridge.host_flush_period(),
            flush_batch: config.bridge.flush_batch,
            max_payload,
            serial_write_wait: config.bridge.serial_write_wait(),
            heartbeat: config.bridge.heartbeat_interval(),
            status: config.bridge.status_period(),
        },
        &running,
    );
    info!("{} periodic task(s) running", tasks.len());

    // ── Control loop ──────────────────────────────────────────────────────────
    let handshake = ProvisioningHandshake::new(
        Arc::clone(&radio),
        transport,
        Arc::clone(&to_host),
        config.provisioning.poll_interval(),
    );
    let discovery = DiscoveryListener::new(
        discovery_bind_addr(&config)?,
        config.network.discovery_recv_timeout(),
        config.bridge.retry_delay(),
    );
    let session = BridgeSession::new(
        Arc::clone(&registry),
        Arc::clone(&to_network),
        Arc::clone(&to_host),
        SessionSettings {
            connect_timeout: config.network.connect_timeout(),
            poll_interval: config.network.session_poll(),
            send_batch: config.network.send_batch,
            max_payload,
            keepalive: KeepaliveSettings {
                idle: config.network.keepalive_idle(),
                interval: config.network.keepalive_interval(),
                retries: config.network.keepalive_retries,
            },
        },
    );
    let phases = NetworkPhases::new(
        radio,
        handshake,
        config.provisioning.timeout(),
        discovery,
        session,
        config.network.session_port,
        Arc::clone(&signal),
        Arc::clone(&running),
    );
    let mut controller = ConnectivityController::new(
        phases,
        Arc::clone(&mode),
        Arc::clone(&signal),
        Arc::clone(&running),
        config.bridge.retry_delay(),
    );
    let control = tokio::spawn(async move { controller.run().await });

    // ── Ctrl-C ────────────────────────────────────────────────────────────────
    info!("NetDebugLink bridge ready.  Press Enter to re-provision, Ctrl-C to exit.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for Ctrl-C: {e}"),
    }
    running.store(false, Ordering::SeqCst);

    match tokio::time::timeout(SHUTDOWN_GRACE, control).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("control loop ended abnormally: {e}"),
        Err(_) => warn!("control loop did not stop within {SHUTDOWN_GRACE:?}"),
    }
    tasks.stop(SHUTDOWN_GRACE).await;

    info!("NetDebugLink bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["ndl-bridge", "--config", "/nonexistent/ndl-bridge.toml"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_cli_defaults_leave_overrides_unset() {
        // Arrange / Act
        let cli = Cli::parse_from(["ndl-bridge"]);

        // Assert
        assert_eq!(cli.session_port, None);
        assert_eq!(cli.discovery_port, None);
        assert_eq!(cli.log_level, None);
        assert!(!cli.save_config);
    }

    #[test]
    fn test_save_config_writes_the_overridden_configuration() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("ndl-bridge-main-{}", std::process::id()));
        let path = dir.join("ndl-bridge.toml");
        let cli = Cli::parse_from([
            "ndl-bridge",
            "--config",
            path.to_str().unwrap(),
            "--session-port",
            "6100",
            "--save-config",
        ]);
        assert!(cli.save_config);
        let config = cli.into_bridge_config().unwrap();

        // Act
        write_config(&path, &config).unwrap();

        // Assert
        let reloaded = load_config(&path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.network.session_port, 6100);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let config = cli(&[]).into_bridge_config().unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_port_overrides_replace_config_values() {
        // Arrange
        let cli = cli(&["--session-port", "6000", "--discovery-port", "6001"]);

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config.network.session_port, 6000);
        assert_eq!(config.network.discovery_port, 6001);
    }

    #[test]
    fn test_log_level_override() {
        let config = cli(&["--log-level", "debug"]).into_bridge_config().unwrap();
        assert_eq!(config.bridge.log_level, "debug");
    }

    #[test]
    fn test_build_registry_registers_host_and_serial_channels() {
        // Arrange
        let config = BridgeConfig::default();

        // Act
        let registry = build_registry(&config).unwrap();

        // Assert – uart_cdc + uart1 + uart2
        assert_eq!(registry.len(), 3);
        let host = registry.host().unwrap();
        assert_eq!(host.topic().name(), "uart_cdc");
    }

    #[test]
    fn test_invalid_bind_address_is_an_error() {
        let mut config = BridgeConfig::default();
        config.network.bind_address = "not.an.ip".to_string();
        assert!(discovery_bind_addr(&config).is_err());
    }

    #[test]
    fn test_largest_payload_covers_every_channel() {
        let mut config = BridgeConfig::default();
        config.channels.serial[1].max_payload = 8000;
        assert_eq!(largest_payload(&config), 8000);
    }
}
