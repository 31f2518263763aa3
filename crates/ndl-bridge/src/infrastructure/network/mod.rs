//! Network session manager: UDP discovery followed by a TCP session.
//!
//! [`NetworkPhases`] plugs the provisioning handshake, the discovery
//! listener and the bridging session into the control loop's
//! [`ConnectivityPhases`] seam.

pub mod discovery;
pub mod session;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::application::connectivity::{ConnectivityPhases, DiscoveryOutcome, SessionEnd};
use crate::application::ports::Radio;
use crate::application::provisioning::{ProvisioningHandshake, ProvisioningOutcome};
use crate::application::signal::ReprovisionSignal;

pub use discovery::{DiscoveryContext, DiscoveryError, DiscoveryListener};
pub use session::{
    BridgeSession, KeepaliveSettings, SessionContext, SessionError, SessionSettings,
};

pub struct NetworkPhases {
    radio: Arc<dyn Radio>,
    handshake: ProvisioningHandshake,
    provisioning_timeout: Duration,
    discovery: DiscoveryListener,
    session: BridgeSession,
    session_port: u16,
    signal: Arc<ReprovisionSignal>,
    running: Arc<AtomicBool>,
}

impl NetworkPhases {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radio: Arc<dyn Radio>,
        handshake: ProvisioningHandshake,
        provisioning_timeout: Duration,
        discovery: DiscoveryListener,
        session: BridgeSession,
        session_port: u16,
        signal: Arc<ReprovisionSignal>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            radio,
            handshake,
            provisioning_timeout,
            discovery,
            session,
            session_port,
            signal,
            running,
        }
    }
}

#[async_trait]
impl ConnectivityPhases for NetworkPhases {
    fn is_associated(&self) -> bool {
        self.radio.is_connected()
    }

    async fn provision(&self) -> Result<ProvisioningOutcome, String> {
        self.handshake
            .run(self.provisioning_timeout, &self.running)
            .await
            .map_err(|e| e.to_string())
    }

    async fn discover(&self) -> DiscoveryOutcome {
        let ctx = DiscoveryContext {
            radio: self.radio.as_ref(),
            signal: &self.signal,
            running: &self.running,
        };
        self.discovery.discover(&ctx).await
    }

    /// Connects to the session port on the peer's address; the datagram's
    /// source port is not used.
    async fn bridge(&self, peer: SocketAddr) -> SessionEnd {
        let addr = SocketAddr::new(peer.ip(), self.session_port);
        let ctx = SessionContext {
            radio: self.radio.as_ref(),
            signal: &self.signal,
            running: &self.running,
        };
        self.session.run(addr, &ctx).await
    }
}
