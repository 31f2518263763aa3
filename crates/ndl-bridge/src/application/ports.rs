//! Capability traits the bridge runtime consumes.
//!
//! Serial drivers, the radio, the status indicator, the button and the
//! out-of-band credential transport are all external collaborators.  The
//! application layer talks to them only through these traits; concrete
//! adapters live in `infrastructure` (in-memory ones in
//! `infrastructure::mock`).

use std::time::Duration;

use async_trait::async_trait;
use ndl_core::Credentials;
use thiserror::Error;
use tokio::sync::mpsc;

// ── Serial ────────────────────────────────────────────────────────────────────

/// How long a serial operation may wait for the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return immediately with whatever is possible.
    NoWait,
    /// Wait at most this long for the driver to become ready.
    Bounded(Duration),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerialError {
    #[error("serial operation timed out")]
    Timeout,
    #[error("serial driver error: {0}")]
    Driver(String),
}

/// A serial channel.  Methods take `&self` so one port can be shared by the
/// poll task (reads) and the drain task (writes).
#[cfg_attr(test, mockall::automock)]
pub trait SerialPort: Send + Sync {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&self, buf: &mut [u8], wait: WaitPolicy) -> Result<usize, SerialError>;

    /// Writes all of `data`.
    fn write(&self, data: &[u8], wait: WaitPolicy) -> Result<(), SerialError>;

    /// Bytes that can be read without waiting.
    fn available(&self) -> usize;
}

// ── Radio ─────────────────────────────────────────────────────────────────────

/// A network seen during a radio scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: Vec<u8>,
    pub rssi: i8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RadioError {
    #[error("radio not initialised")]
    NotInitialized,
    #[error("association failed: {0}")]
    ConnectFailed(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
}

/// Wireless radio in station mode.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Radio: Send + Sync {
    /// Associates with the network named in `credentials`.
    async fn connect(&self, credentials: &Credentials) -> Result<(), RadioError>;

    /// Leaves the current network and stops any automatic reconnect.
    async fn disconnect(&self) -> Result<(), RadioError>;

    fn is_connected(&self) -> bool;

    async fn scan(&self, max_results: usize) -> Result<Vec<ScanResult>, RadioError>;

    fn hardware_address(&self) -> [u8; 6];
}

// ── Status indicator ──────────────────────────────────────────────────────────

#[cfg_attr(test, mockall::automock)]
pub trait StatusIndicator: Send + Sync {
    fn set_blink_rate(&self, hz: u32);

    /// `fraction` is in `0.0..=1.0`.
    fn set_intensity(&self, fraction: f32);
}

// ── Button ────────────────────────────────────────────────────────────────────

/// Called from the button's own context on every falling edge.
pub type EdgeCallback = Box<dyn Fn() + Send + Sync + 'static>;

pub trait ButtonSource: Send + Sync {
    /// Installs the edge callback, replacing any previous one.
    fn on_edge(&self, callback: EdgeCallback);

    /// Starts delivering edges.
    fn enable(&self);
}

// ── Credential transport ──────────────────────────────────────────────────────

/// Events the out-of-band transport reports to the provisioning handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport finished initialising and can advertise.
    Ready,
    PeerConnected,
    PeerDisconnected,
    Ssid(Vec<u8>),
    Password(Vec<u8>),
    /// The peer finished sending credentials and asks us to connect.
    ConnectRequested,
    PeerListRequested,
    StatusRequested,
}

/// Association state reported back to the provisioning peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningStatus {
    pub associated: bool,
}

/// Handle the transport uses to deliver [`TransportEvent`]s.
///
/// It is handed to the transport in [`CredentialTransport::init`], so the
/// handshake owns the dispatch path and no global state is involved.
/// Delivery never blocks the transport's callback context.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    tx: mpsc::Sender<TransportEvent>,
}

impl TransportEventSink {
    pub fn new(tx: mpsc::Sender<TransportEvent>) -> Self {
        Self { tx }
    }

    /// Delivers `event`.  Returns `false` if it was dropped because the
    /// handshake is gone or lagging.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport initialisation failed: {0}")]
    Init(String),
    #[error("transport not initialised")]
    NotInitialized,
    #[error("transport I/O failed: {0}")]
    Io(String),
}

/// Secure out-of-band channel that yields plaintext credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialTransport: Send + Sync {
    async fn init(&self, events: TransportEventSink) -> Result<(), TransportError>;

    async fn start_advertising(&self) -> Result<(), TransportError>;

    async fn stop_advertising(&self) -> Result<(), TransportError>;

    /// Drops the connected peer, if any.
    async fn disconnect_peer(&self) -> Result<(), TransportError>;

    /// Tears the transport down.  Safe to call when not initialised.
    async fn deinit(&self) -> Result<(), TransportError>;

    async fn report_peer_list(&self, peers: &[ScanResult]) -> Result<(), TransportError>;

    async fn report_status(&self, status: ProvisioningStatus) -> Result<(), TransportError>;
}
