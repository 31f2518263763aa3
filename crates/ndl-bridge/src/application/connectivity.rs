//! The control loop: drives the connectivity state machine through its
//! phases.
//!
//! The machine itself ([`ndl_core::ModeMachine`]) is pure.  This module
//! runs whatever phase the current mode calls for, turns its outcome into a
//! [`ConnectivityEvent`], and publishes the resulting mode for the other
//! tasks.  The phases are reached through [`ConnectivityPhases`] so the
//! loop has no dependency on sockets or radios.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ndl_core::{ConnectivityEvent, Mode, ModeMachine};
use tracing::{info, warn};

use crate::application::provisioning::ProvisioningOutcome;
use crate::application::signal::{ReprovisionSignal, SharedMode};

/// How a discovery phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// A datagram arrived; this is the peer's address.
    Peer(SocketAddr),
    Reprovision,
    LinkLost,
    Stopped,
}

/// Why a bridging session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    /// Unrecoverable socket error, including keep-alive failure.
    Io(String),
    ConnectFailed(String),
    /// The radio lost its association mid-session.
    LinkLost,
    Reprovision,
    Stopped,
}

/// The three phases the control loop alternates between.
#[async_trait]
pub trait ConnectivityPhases: Send + Sync {
    /// Whether the radio currently holds a network association.
    fn is_associated(&self) -> bool;

    /// Runs one provisioning handshake.  `Err` carries a setup failure.
    async fn provision(&self) -> Result<ProvisioningOutcome, String>;

    /// Listens for a peer until one is found or the phase must be abandoned.
    async fn discover(&self) -> DiscoveryOutcome;

    /// Runs one session with `peer` until it ends.
    async fn bridge(&self, peer: SocketAddr) -> SessionEnd;
}

pub struct ConnectivityController<P> {
    phases: P,
    machine: ModeMachine,
    mode: Arc<SharedMode>,
    signal: Arc<ReprovisionSignal>,
    running: Arc<AtomicBool>,
    peer: Option<SocketAddr>,
    retry_delay: Duration,
}

impl<P: ConnectivityPhases> ConnectivityController<P> {
    pub fn new(
        phases: P,
        mode: Arc<SharedMode>,
        signal: Arc<ReprovisionSignal>,
        running: Arc<AtomicBool>,
        retry_delay: Duration,
    ) -> Self {
        mode.set(Mode::Init);
        Self {
            phases,
            machine: ModeMachine::new(),
            mode,
            signal,
            running,
            peer: None,
            retry_delay,
        }
    }

    pub fn mode(&self) -> Mode {
        self.machine.mode()
    }

    /// Last discovered peer.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Runs until the `running` flag clears.
    pub async fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.step().await;
        }
        info!("control loop stopped");
    }

    /// Runs the phase for the current mode once and applies its outcome.
    pub async fn step(&mut self) -> Mode {
        let event = match self.machine.mode() {
            Mode::Init => Some(ConnectivityEvent::Boot {
                associated: self.phases.is_associated(),
            }),
            Mode::Provisioning => self.provisioning_phase().await,
            Mode::Scanning => self.scanning_phase().await,
            Mode::Bridging => self.bridging_phase().await,
        };
        if let Some(event) = event {
            self.apply(event);
        }
        self.machine.mode()
    }

    fn apply(&mut self, event: ConnectivityEvent) {
        let before = self.machine.mode();
        let after = self.machine.handle(event);
        self.mode.set(after);
        if before != after {
            info!("{before:?} -> {after:?} ({event:?})");
        }
    }

    async fn provisioning_phase(&mut self) -> Option<ConnectivityEvent> {
        self.signal.clear();
        match self.phases.provision().await {
            Ok(ProvisioningOutcome::Applied { .. }) => Some(ConnectivityEvent::ProvisioningSucceeded),
            Ok(ProvisioningOutcome::TimedOut) => Some(ConnectivityEvent::ProvisioningFailed),
            Ok(ProvisioningOutcome::Stopped) => None,
            Err(e) => {
                warn!("provisioning setup failed: {e}; retrying in {:?}", self.retry_delay);
                tokio::time::sleep(self.retry_delay).await;
                Some(ConnectivityEvent::ProvisioningFailed)
            }
        }
    }

    async fn scanning_phase(&mut self) -> Option<ConnectivityEvent> {
        if self.signal.is_requested() {
            return Some(ConnectivityEvent::ReprovisionRequested);
        }
        if !self.phases.is_associated() {
            warn!("radio not associated; returning to provisioning");
            return Some(ConnectivityEvent::LinkLost);
        }
        match self.phases.discover().await {
            DiscoveryOutcome::Peer(addr) => {
                info!("discovered peer {addr}");
                self.peer = Some(addr);
                Some(ConnectivityEvent::PeerDiscovered)
            }
            DiscoveryOutcome::Reprovision => Some(ConnectivityEvent::ReprovisionRequested),
            DiscoveryOutcome::LinkLost => Some(ConnectivityEvent::LinkLost),
            DiscoveryOutcome::Stopped => None,
        }
    }

    async fn bridging_phase(&mut self) -> Option<ConnectivityEvent> {
        let Some(peer) = self.peer else {
            return Some(ConnectivityEvent::SessionEnded);
        };
        match self.phases.bridge(peer).await {
            SessionEnd::Reprovision => Some(ConnectivityEvent::ReprovisionRequested),
            SessionEnd::Stopped => None,
            SessionEnd::PeerClosed => {
                info!("peer {peer} closed the session");
                Some(ConnectivityEvent::SessionEnded)
            }
            SessionEnd::Io(e) => {
                warn!("session with {peer} failed: {e}");
                Some(ConnectivityEvent::SessionEnded)
            }
            SessionEnd::LinkLost => {
                warn!("radio link lost during session with {peer}");
                Some(ConnectivityEvent::SessionEnded)
            }
            SessionEnd::ConnectFailed(e) => {
                warn!("cannot connect to {peer}: {e}");
                tokio::time::sleep(self.retry_delay).await;
                Some(ConnectivityEvent::SessionEnded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Phases that replay canned outcomes.
    #[derive(Default)]
    struct CannedPhases {
        associated: Mutex<VecDeque<bool>>,
        provision: Mutex<VecDeque<Result<ProvisioningOutcome, String>>>,
        discover: Mutex<VecDeque<DiscoveryOutcome>>,
        bridge: Mutex<VecDeque<SessionEnd>>,
    }

    #[async_trait]
    impl ConnectivityPhases for CannedPhases {
        fn is_associated(&self) -> bool {
            self.associated.lock().unwrap().pop_front().unwrap_or(true)
        }
        async fn provision(&self) -> Result<ProvisioningOutcome, String> {
            self.provision
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ProvisioningOutcome::TimedOut))
        }
        async fn discover(&self) -> DiscoveryOutcome {
            self.discover.lock().unwrap().pop_front().unwrap_or(DiscoveryOutcome::Stopped)
        }
        async fn bridge(&self, _peer: SocketAddr) -> SessionEnd {
            self.bridge.lock().unwrap().pop_front().unwrap_or(SessionEnd::Stopped)
        }
    }

    fn controller(phases: CannedPhases) -> ConnectivityController<CannedPhases> {
        ConnectivityController::new(
            phases,
            Arc::new(SharedMode::new()),
            Arc::new(ReprovisionSignal::new()),
            Arc::new(AtomicBool::new(true)),
            Duration::from_millis(10),
        )
    }

    fn peer() -> SocketAddr {
        "192.168.4.2:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_unassociated_boot_reaches_provisioning() {
        let phases = CannedPhases::default();
        phases.associated.lock().unwrap().push_back(false);
        let mut c = controller(phases);

        assert_eq!(c.step().await, Mode::Provisioning);
        assert_eq!(c.mode.get(), Mode::Provisioning);
    }

    #[tokio::test]
    async fn test_provisioning_timeout_retries_provisioning() {
        let phases = CannedPhases::default();
        phases.associated.lock().unwrap().push_back(false);
        phases.provision.lock().unwrap().push_back(Ok(ProvisioningOutcome::TimedOut));
        let mut c = controller(phases);

        c.step().await;
        assert_eq!(c.step().await, Mode::Provisioning);
    }

    #[tokio::test]
    async fn test_full_cycle_to_bridging_and_back_to_scanning() {
        // Arrange
        let phases = CannedPhases::default();
        phases.associated.lock().unwrap().push_back(false);
        phases
            .provision
            .lock()
            .unwrap()
            .push_back(Ok(ProvisioningOutcome::Applied { associated: true }));
        phases.discover.lock().unwrap().push_back(DiscoveryOutcome::Peer(peer()));
        phases.bridge.lock().unwrap().push_back(SessionEnd::PeerClosed);
        let mut c = controller(phases);

        // Act / Assert
        assert_eq!(c.step().await, Mode::Provisioning);
        assert_eq!(c.step().await, Mode::Scanning);
        assert_eq!(c.step().await, Mode::Bridging);
        assert_eq!(c.peer(), Some(peer()));
        assert_eq!(c.step().await, Mode::Scanning);
    }

    #[tokio::test]
    async fn test_scanning_with_lost_link_returns_to_provisioning() {
        let phases = CannedPhases::default();
        phases.associated.lock().unwrap().extend([true, false]);
        let mut c = controller(phases);

        assert_eq!(c.step().await, Mode::Scanning);
        assert_eq!(c.step().await, Mode::Provisioning);
    }

    #[tokio::test]
    async fn test_pending_signal_is_honoured_on_entering_scanning() {
        let phases = CannedPhases::default();
        let mut c = controller(phases);
        c.step().await;
        c.signal.fire();

        assert_eq!(c.step().await, Mode::Provisioning);
    }

    #[tokio::test]
    async fn test_provisioning_clears_signal() {
        let phases = CannedPhases::default();
        phases.associated.lock().unwrap().push_back(false);
        let mut c = controller(phases);
        c.step().await;
        c.signal.fire();

        c.step().await;

        assert!(!c.signal.is_requested());
    }

    #[tokio::test]
    async fn test_session_link_loss_leads_back_to_provisioning() {
        // Arrange – associated at boot and on entering scanning, then gone
        let phases = CannedPhases::default();
        phases.associated.lock().unwrap().extend([true, true, false]);
        phases.discover.lock().unwrap().push_back(DiscoveryOutcome::Peer(peer()));
        phases.bridge.lock().unwrap().push_back(SessionEnd::LinkLost);
        let mut c = controller(phases);

        // Act / Assert
        assert_eq!(c.step().await, Mode::Scanning);
        assert_eq!(c.step().await, Mode::Bridging);
        assert_eq!(c.step().await, Mode::Scanning);
        assert_eq!(c.step().await, Mode::Provisioning);
    }
}
