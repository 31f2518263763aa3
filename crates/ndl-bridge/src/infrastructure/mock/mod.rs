//! In-memory capability adapters.
//!
//! # Why in-memory adapters?
//!
//! The real collaborators (UART drivers, the wireless radio, the LED, the
//! button interrupt, the BLE provisioning stack) need hardware.  These
//! adapters replace them with recorded state so that:
//!
//! - tests can feed serial input and inspect every write;
//! - the `ndl-bridge` binary can run the complete runtime on a desktop.
//!
//! All state sits behind `Mutex` or atomics so an adapter can be shared in
//! an `Arc` between the periodic tasks and the control loop.
//!
//! # `set_fail_*` flags
//!
//! Several adapters can be told to fail, which lets tests drive the error
//! paths of their callers without a broken driver.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ndl_core::Credentials;
use tracing::{debug, info};

use crate::application::ports::{
    ButtonSource, CredentialTransport, EdgeCallback, ProvisioningStatus, Radio, RadioError,
    ScanResult, SerialError, SerialPort, StatusIndicator, TransportError, TransportEvent,
    TransportEventSink, WaitPolicy,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Serial ────────────────────────────────────────────────────────────────────

/// A serial port backed by an input buffer and a write log.
#[derive(Debug, Default)]
pub struct MemorySerialPort {
    rx: Mutex<VecDeque<u8>>,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemorySerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `bytes` available to the next reads, as if received on the wire.
    pub fn feed(&self, bytes: &[u8]) {
        lock(&self.rx).extend(bytes);
    }

    /// Every successful `write` call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.writes).concat()
    }

    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *lock(&self.writes))
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SerialPort for MemorySerialPort {
    fn read(&self, buf: &mut [u8], _wait: WaitPolicy) -> Result<usize, SerialError> {
        let mut rx = lock(&self.rx);
        let n = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, data: &[u8], _wait: WaitPolicy) -> Result<(), SerialError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SerialError::Driver("simulated write failure".to_string()));
        }
        lock(&self.writes).push(data.to_vec());
        Ok(())
    }

    fn available(&self) -> usize {
        lock(&self.rx).len()
    }
}

// ── Radio ─────────────────────────────────────────────────────────────────────

/// A radio that associates with any network it is given credentials for.
#[derive(Debug)]
pub struct SimulatedRadio {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    networks: Vec<ScanResult>,
    applied: Mutex<Option<Credentials>>,
    hw_address: [u8; 6],
}

impl SimulatedRadio {
    pub fn new(associated: bool) -> Self {
        Self {
            connected: AtomicBool::new(associated),
            fail_connect: AtomicBool::new(false),
            networks: Vec::new(),
            applied: Mutex::new(None),
            hw_address: [0x02, 0x4E, 0x44, 0x4C, 0x00, 0x01],
        }
    }

    /// Networks returned by `scan`.
    pub fn with_networks(mut self, networks: Vec<ScanResult>) -> Self {
        self.networks = networks;
        self
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Simulates losing the association (access point gone, out of range).
    pub fn drop_link(&self) {
        info!("simulated radio: link lost");
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Credentials from the last successful `connect`.
    pub fn applied_credentials(&self) -> Option<Credentials> {
        lock(&self.applied).clone()
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn connect(&self, credentials: &Credentials) -> Result<(), RadioError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(RadioError::ConnectFailed("simulated failure".to_string()));
        }
        info!("simulated radio: associated with '{}'", credentials.ssid_lossy());
        *lock(&self.applied) = Some(credentials.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn scan(&self, max_results: usize) -> Result<Vec<ScanResult>, RadioError> {
        Ok(self.networks.iter().take(max_results).cloned().collect())
    }

    fn hardware_address(&self) -> [u8; 6] {
        self.hw_address
    }
}

// ── Status indicator ──────────────────────────────────────────────────────────

/// An indicator that logs and records every setting.
#[derive(Debug, Default)]
pub struct LoggingIndicator {
    pub blink_rates: Mutex<Vec<u32>>,
    pub intensities: Mutex<Vec<f32>>,
}

impl LoggingIndicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusIndicator for LoggingIndicator {
    fn set_blink_rate(&self, hz: u32) {
        info!("indicator: blink {hz} Hz");
        lock(&self.blink_rates).push(hz);
    }

    fn set_intensity(&self, fraction: f32) {
        debug!("indicator: intensity {fraction:.2}");
        lock(&self.intensities).push(fraction);
    }
}

// ── Button ────────────────────────────────────────────────────────────────────

/// A button pressed from code.
#[derive(Default)]
pub struct ManualButton {
    callback: Mutex<Option<EdgeCallback>>,
    enabled: AtomicBool,
}

impl ManualButton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces one falling edge.  Returns `false` if the button is not
    /// enabled or has no callback.
    pub fn press(&self) -> bool {
        if !self.enabled.load(Ordering::SeqCst) {
            return false;
        }
        match lock(&self.callback).as_ref() {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl ButtonSource for ManualButton {
    fn on_edge(&self, callback: EdgeCallback) {
        *lock(&self.callback) = Some(callback);
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }
}

// ── Credential transport ──────────────────────────────────────────────────────

/// Calls made on a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Init,
    StartAdvertising,
    StopAdvertising,
    DisconnectPeer,
    Deinit,
    /// Number of networks reported.
    ReportPeerList(usize),
    ReportStatus(ProvisioningStatus),
}

/// A transport that replays a fixed list of events after every `init`,
/// one every `delay`.
pub struct ScriptedTransport {
    script: Vec<TransportEvent>,
    delay: Duration,
    sink: Mutex<Option<TransportEventSink>>,
    calls: Mutex<Vec<TransportCall>>,
    fail_init: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(script: Vec<TransportEvent>, delay: Duration) -> Self {
        Self {
            script,
            delay,
            sink: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            fail_init: AtomicBool::new(false),
        }
    }

    /// A script that delivers `ssid` / `password` the way a phone app would.
    pub fn delivering(ssid: &str, password: &str, delay: Duration) -> Self {
        Self::new(
            vec![
                TransportEvent::Ready,
                TransportEvent::PeerConnected,
                TransportEvent::Ssid(ssid.as_bytes().to_vec()),
                TransportEvent::Password(password.as_bytes().to_vec()),
                TransportEvent::ConnectRequested,
            ],
            delay,
        )
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    /// Delivers an extra event to the current handshake, if any.
    pub fn emit(&self, event: TransportEvent) -> bool {
        lock(&self.sink)
            .as_ref()
            .map(|sink| sink.deliver(event))
            .unwrap_or(false)
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl CredentialTransport for ScriptedTransport {
    async fn init(&self, events: TransportEventSink) -> Result<(), TransportError> {
        self.record(TransportCall::Init);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(TransportError::Init("simulated failure".to_string()));
        }

        let script = self.script.clone();
        let delay = self.delay;
        let replay = events.clone();
        tokio::spawn(async move {
            for event in script {
                tokio::time::sleep(delay).await;
                if !replay.deliver(event) {
                    break;
                }
            }
        });

        *lock(&self.sink) = Some(events);
        Ok(())
    }

    async fn start_advertising(&self) -> Result<(), TransportError> {
        self.record(TransportCall::StartAdvertising);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        self.record(TransportCall::StopAdvertising);
        Ok(())
    }

    async fn disconnect_peer(&self) -> Result<(), TransportError> {
        self.record(TransportCall::DisconnectPeer);
        Ok(())
    }

    async fn deinit(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Deinit);
        *lock(&self.sink) = None;
        Ok(())
    }

    async fn report_peer_list(&self, peers: &[ScanResult]) -> Result<(), TransportError> {
        self.record(TransportCall::ReportPeerList(peers.len()));
        Ok(())
    }

    async fn report_status(&self, status: ProvisioningStatus) -> Result<(), TransportError> {
        self.record(TransportCall::ReportStatus(status));
        Ok(())
    }
}
