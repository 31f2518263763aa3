//! Provisioning handshake: obtain credentials out-of-band and apply them.
//!
//! [`ProvisioningHandshake::run`] initialises the credential transport,
//! answers its requests (peer list, status) and waits for a complete set of
//! credentials.  The wait is a series of short bounded slices so the overall
//! deadline and the process `running` flag are re-checked regularly.
//!
//! Once credentials arrive the transport is torn down and the radio is told
//! to connect.  Only if the radio then reports a live association is a
//! credentials-applied report queued toward the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndl_core::protocol::control::credentials_report_envelope;
use ndl_core::{BridgeQueue, Credentials};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::ports::{
    CredentialTransport, ProvisioningStatus, Radio, TransportError, TransportEvent,
    TransportEventSink,
};

/// Most networks reported back for one peer-list request.
pub const MAX_SCAN_RESULTS: usize = 10;

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("credential transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// How a handshake run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// Credentials were received and handed to the radio.
    Applied { associated: bool },
    /// The deadline passed without complete credentials.
    TimedOut,
    /// The process is shutting down.
    Stopped,
}

/// Fields received so far in this run.
#[derive(Debug, Default)]
struct PendingCredentials {
    ssid: Option<Vec<u8>>,
    password: Vec<u8>,
}

pub struct ProvisioningHandshake {
    radio: Arc<dyn Radio>,
    transport: Arc<dyn CredentialTransport>,
    to_host: Arc<BridgeQueue>,
    poll_interval: Duration,
}

impl ProvisioningHandshake {
    pub fn new(
        radio: Arc<dyn Radio>,
        transport: Arc<dyn CredentialTransport>,
        to_host: Arc<BridgeQueue>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            radio,
            transport,
            to_host,
            poll_interval,
        }
    }

    /// Runs one handshake with an overall `timeout`.
    ///
    /// # Errors
    ///
    /// [`ProvisioningError::Transport`] if the transport cannot be
    /// initialised.  The caller treats this like a timeout and retries.
    pub async fn run(
        &self,
        timeout: Duration,
        running: &AtomicBool,
    ) -> Result<ProvisioningOutcome, ProvisioningError> {
        info!(
            "starting provisioning (radio {})",
            format_hw_address(&self.radio.hardware_address())
        );

        if let Err(e) = self.radio.disconnect().await {
            debug!("radio disconnect before provisioning: {e}");
        }

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        if let Err(e) = self.transport.init(TransportEventSink::new(tx)).await {
            self.teardown().await;
            return Err(e.into());
        }

        info!("waiting up to {timeout:?} for credentials");
        let deadline = Instant::now() + timeout;
        let mut pending = PendingCredentials::default();

        loop {
            if !running.load(Ordering::SeqCst) {
                self.teardown().await;
                return Ok(ProvisioningOutcome::Stopped);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("provisioning timed out after {timeout:?}");
                self.teardown().await;
                return Ok(ProvisioningOutcome::TimedOut);
            }
            let slice = self.poll_interval.min(deadline - now);

            match tokio::time::timeout(slice, rx.recv()).await {
                Err(_) => continue,
                Ok(None) => {
                    // Transport dropped its sink; keep waiting out the deadline.
                    tokio::time::sleep(slice).await;
                }
                Ok(Some(event)) => {
                    if let Some(creds) = self.handle_event(event, &mut pending).await {
                        return Ok(self.apply(creds).await);
                    }
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: TransportEvent,
        pending: &mut PendingCredentials,
    ) -> Option<Credentials> {
        match event {
            TransportEvent::Ready => {
                debug!("transport ready; advertising");
                self.log_transport(self.transport.start_advertising().await);
            }
            TransportEvent::PeerConnected => {
                info!("provisioning peer connected");
                self.log_transport(self.transport.stop_advertising().await);
            }
            TransportEvent::PeerDisconnected => {
                info!("provisioning peer disconnected");
                self.log_transport(self.transport.start_advertising().await);
            }
            TransportEvent::Ssid(ssid) => {
                debug!("received ssid ({} bytes)", ssid.len());
                pending.ssid = Some(ssid);
            }
            TransportEvent::Password(password) => {
                debug!("received password ({} bytes)", password.len());
                pending.password = password;
            }
            TransportEvent::ConnectRequested => {
                let Some(ssid) = pending.ssid.as_deref() else {
                    warn!("connect requested before an ssid was received");
                    return None;
                };
                match Credentials::new(ssid, &pending.password) {
                    Ok(creds) => return Some(creds),
                    Err(e) => warn!("rejecting credentials: {e}"),
                }
            }
            TransportEvent::PeerListRequested => {
                let peers = match self.radio.scan(MAX_SCAN_RESULTS).await {
                    Ok(peers) => peers,
                    Err(e) => {
                        warn!("scan for provisioning peer failed: {e}");
                        Vec::new()
                    }
                };
                self.log_transport(self.transport.report_peer_list(&peers).await);
            }
            TransportEvent::StatusRequested => {
                let status = ProvisioningStatus {
                    associated: self.radio.is_connected(),
                };
                self.log_transport(self.transport.report_status(status).await);
            }
        }
        None
    }

    async fn apply(&self, creds: Credentials) -> ProvisioningOutcome {
        info!("received credentials for '{}'", creds.ssid_lossy());
        self.teardown().await;

        if let Err(e) = self.radio.connect(&creds).await {
            warn!("radio connect failed: {e}");
        }

        let associated = self.radio.is_connected();
        if associated {
            self.report_applied(&creds);
        } else {
            warn!("association with '{}' not confirmed", creds.ssid_lossy());
        }
        ProvisioningOutcome::Applied { associated }
    }

    // Best effort: if the queue is full the report is lost.
    fn report_applied(&self, creds: &Credentials) {
        match credentials_report_envelope(creds) {
            Ok(frame) => {
                if let Err(e) = self.to_host.push(&frame) {
                    warn!("credentials report dropped: {e}");
                }
            }
            Err(e) => warn!("cannot encode credentials report: {e}"),
        }
    }

    async fn teardown(&self) {
        self.log_transport(self.transport.disconnect_peer().await);
        self.log_transport(self.transport.deinit().await);
    }

    fn log_transport(&self, result: Result<(), TransportError>) {
        if let Err(e) = result {
            warn!("credential transport: {e}");
        }
    }
}

fn format_hw_address(addr: &[u8; 6]) -> String {
    addr.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockCredentialTransport, MockRadio, RadioError, ScanResult};
    use mockall::Sequence;
    use ndl_core::decode_envelope;
    use ndl_core::protocol::control::decode_credentials;

    fn running() -> AtomicBool {
        AtomicBool::new(true)
    }

    fn base_radio() -> MockRadio {
        let mut radio = MockRadio::new();
        radio.expect_hardware_address().return_const([0x24, 0x0A, 0xC4, 0, 0, 1]);
        radio.expect_disconnect().returning(|| Ok(()));
        radio
    }

    /// A transport that delivers `script` as soon as it is initialised.
    fn transport(script: Vec<TransportEvent>) -> MockCredentialTransport {
        let mut t = MockCredentialTransport::new();
        t.expect_init().times(1).returning(move |sink| {
            for event in script.clone() {
                assert!(sink.deliver(event));
            }
            Ok(())
        });
        t
    }

    /// Accepts advertising and teardown calls in any number.
    fn accept_lifecycle(t: &mut MockCredentialTransport) {
        t.expect_start_advertising().returning(|| Ok(()));
        t.expect_stop_advertising().returning(|| Ok(()));
        t.expect_disconnect_peer().returning(|| Ok(()));
        t.expect_deinit().returning(|| Ok(()));
    }

    /// Expects exactly one teardown: drop the peer, then deinit.
    fn expect_teardown(t: &mut MockCredentialTransport) {
        let mut seq = Sequence::new();
        t.expect_disconnect_peer()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        t.expect_deinit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
    }

    fn handshake(
        radio: MockRadio,
        transport: MockCredentialTransport,
    ) -> (ProvisioningHandshake, Arc<BridgeQueue>) {
        let q = Arc::new(BridgeQueue::new("host", 4096));
        let hs = ProvisioningHandshake::new(
            Arc::new(radio),
            Arc::new(transport),
            Arc::clone(&q),
            Duration::from_millis(500),
        );
        (hs, q)
    }

    fn credential_script() -> Vec<TransportEvent> {
        vec![
            TransportEvent::Ready,
            TransportEvent::PeerConnected,
            TransportEvent::Ssid(b"lab-ap".to_vec()),
            TransportEvent::Password(b"pa55word".to_vec()),
            TransportEvent::ConnectRequested,
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_connects_radio_and_reports_credentials() {
        // Arrange
        let mut radio = base_radio();
        radio
            .expect_connect()
            .withf(|c| c.ssid() == b"lab-ap" && c.password() == b"pa55word")
            .times(1)
            .returning(|_| Ok(()));
        radio.expect_is_connected().return_const(true);
        let mut t = transport(credential_script());
        t.expect_start_advertising().times(1).returning(|| Ok(()));
        t.expect_stop_advertising().times(1).returning(|| Ok(()));
        expect_teardown(&mut t);
        let (hs, q) = handshake(radio, t);

        // Act
        let outcome = hs.run(Duration::from_secs(30), &running()).await.unwrap();

        // Assert
        assert_eq!(outcome, ProvisioningOutcome::Applied { associated: true });
        let bytes = q.pop(4096);
        let (view, _) = decode_envelope(&bytes).unwrap();
        let creds = decode_credentials(view.payload).unwrap();
        assert_eq!(creds.ssid(), b"lab-ap");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_association_does_not_echo_credentials() {
        let mut radio = base_radio();
        radio
            .expect_connect()
            .returning(|_| Err(RadioError::ConnectFailed("auth".into())));
        radio.expect_is_connected().return_const(false);
        let mut t = transport(credential_script());
        accept_lifecycle(&mut t);
        let (hs, q) = handshake(radio, t);

        let outcome = hs.run(Duration::from_secs(30), &running()).await.unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Applied { associated: false });
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_credentials() {
        // Arrange
        let mut radio = base_radio();
        radio.expect_connect().never();
        let mut t = transport(vec![TransportEvent::Ready]);
        t.expect_start_advertising().times(1).returning(|| Ok(()));
        expect_teardown(&mut t);
        let (hs, q) = handshake(radio, t);
        let started = Instant::now();

        // Act
        let outcome = hs.run(Duration::from_secs(30), &running()).await.unwrap();

        // Assert
        assert_eq!(outcome, ProvisioningOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_ssid_is_ignored() {
        let mut radio = base_radio();
        radio.expect_connect().never();
        let mut t = transport(vec![
            TransportEvent::Password(b"x".to_vec()),
            TransportEvent::ConnectRequested,
        ]);
        accept_lifecycle(&mut t);
        let (hs, _) = handshake(radio, t);

        let outcome = hs.run(Duration::from_secs(3), &running()).await.unwrap();

        assert_eq!(outcome, ProvisioningOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_list_and_status_requests_are_answered() {
        // Arrange
        let mut radio = base_radio();
        radio.expect_scan().withf(|n| *n == MAX_SCAN_RESULTS).returning(|_| {
            Ok(vec![ScanResult {
                ssid: b"lab-ap".to_vec(),
                rssi: -40,
            }])
        });
        radio.expect_is_connected().return_const(false);
        let mut t = transport(vec![
            TransportEvent::PeerListRequested,
            TransportEvent::StatusRequested,
        ]);
        t.expect_report_peer_list()
            .withf(|peers| peers.len() == 1 && peers[0].ssid == b"lab-ap")
            .times(1)
            .returning(|_| Ok(()));
        t.expect_report_status()
            .withf(|status| !status.associated)
            .times(1)
            .returning(|_| Ok(()));
        accept_lifecycle(&mut t);
        let (hs, _) = handshake(radio, t);

        // Act / Assert – the mock verifies both reports on drop
        hs.run(Duration::from_secs(2), &running()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_running_flag_clears() {
        let radio = base_radio();
        let mut t = transport(Vec::new());
        expect_teardown(&mut t);
        let (hs, _) = handshake(radio, t);
        let flag = AtomicBool::new(false);

        let outcome = hs.run(Duration::from_secs(30), &flag).await.unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_init_failure_is_reported() {
        let radio = base_radio();
        let mut t = MockCredentialTransport::new();
        t.expect_init()
            .returning(|_| Err(TransportError::Init("no radio".into())));
        expect_teardown(&mut t);
        let (hs, _) = handshake(radio, t);

        let result = hs.run(Duration::from_secs(30), &running()).await;

        assert!(matches!(result, Err(ProvisioningError::Transport(_))));
    }

    #[test]
    fn test_format_hw_address() {
        assert_eq!(format_hw_address(&[0x24, 0x0A, 0xC4, 0, 0, 1]), "24:0A:C4:00:00:01");
    }
}
