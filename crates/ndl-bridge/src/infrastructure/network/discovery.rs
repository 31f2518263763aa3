//! UDP peer discovery.
//!
//! The bridge binds the discovery port and waits for any datagram.  The
//! first datagram's source address is the peer; its contents are ignored.
//!
//! Every receive is bounded by `recv_timeout` and races the re-provision
//! signal.  Before each receive the listener checks whether it must give
//! up: a re-provision request, a lost radio association, or shutdown.
//!
//! A failed bind is not fatal.  The listener logs it and tries again after
//! `retry_delay`, still checking for abort conditions in between.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::application::connectivity::DiscoveryOutcome;
use crate::application::ports::Radio;
use crate::application::signal::ReprovisionSignal;

/// Largest datagram read; anything beyond is truncated.
const DATAGRAM_BUF: usize = 512;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Collaborators a discovery run checks between receives.
pub struct DiscoveryContext<'a> {
    pub radio: &'a dyn Radio,
    pub signal: &'a ReprovisionSignal,
    pub running: &'a AtomicBool,
}

impl DiscoveryContext<'_> {
    fn abort_reason(&self) -> Option<DiscoveryOutcome> {
        if !self.running.load(Ordering::SeqCst) {
            Some(DiscoveryOutcome::Stopped)
        } else if self.signal.is_requested() {
            Some(DiscoveryOutcome::Reprovision)
        } else if !self.radio.is_connected() {
            Some(DiscoveryOutcome::LinkLost)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryListener {
    bind_addr: SocketAddr,
    recv_timeout: Duration,
    retry_delay: Duration,
}

impl DiscoveryListener {
    pub fn new(bind_addr: SocketAddr, recv_timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            bind_addr,
            recv_timeout,
            retry_delay,
        }
    }

    /// # Errors
    ///
    /// [`DiscoveryError::BindFailed`] if the port cannot be bound.
    pub async fn bind(&self) -> Result<UdpSocket, DiscoveryError> {
        UdpSocket::bind(self.bind_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                addr: self.bind_addr,
                source,
            })
    }

    /// Binds (retrying on failure) and waits for a peer.
    pub async fn discover(&self, ctx: &DiscoveryContext<'_>) -> DiscoveryOutcome {
        let socket = loop {
            if let Some(reason) = ctx.abort_reason() {
                return reason;
            }
            match self.bind().await {
                Ok(socket) => break socket,
                Err(e) => {
                    warn!("{e}; retrying in {:?}", self.retry_delay);
                    tokio::select! {
                        _ = ctx.signal.fired() => return DiscoveryOutcome::Reprovision,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        };
        info!("listening for a peer on UDP {}", self.bind_addr);
        self.wait_for_peer(&socket, ctx).await
    }

    /// Waits on an already bound socket for the first datagram.
    pub async fn wait_for_peer(
        &self,
        socket: &UdpSocket,
        ctx: &DiscoveryContext<'_>,
    ) -> DiscoveryOutcome {
        let mut buf = [0u8; DATAGRAM_BUF];
        loop {
            if let Some(reason) = ctx.abort_reason() {
                debug!("discovery abandoned: {reason:?}");
                return reason;
            }

            tokio::select! {
                biased;
                _ = ctx.signal.fired() => return DiscoveryOutcome::Reprovision,
                received = tokio::time::timeout(self.recv_timeout, socket.recv_from(&mut buf)) => {
                    match received {
                        Err(_) => trace!("no discovery datagram within {:?}", self.recv_timeout),
                        Ok(Ok((len, src))) => {
                            debug!("discovery datagram of {len} byte(s) from {src}");
                            return DiscoveryOutcome::Peer(src);
                        }
                        Ok(Err(e)) if is_transient(&e) => trace!("discovery recv: {e}"),
                        Ok(Err(e)) => {
                            warn!("discovery recv error: {e}");
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }
    }
}

/// Errors that say nothing about the socket's health.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::SimulatedRadio;
    use std::sync::Arc;

    fn listener() -> DiscoveryListener {
        DiscoveryListener::new(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_first_datagram_yields_peer_address() {
        // Arrange
        let radio = SimulatedRadio::new(true);
        let signal = ReprovisionSignal::new();
        let running = AtomicBool::new(true);
        let ctx = DiscoveryContext {
            radio: &radio,
            signal: &signal,
            running: &running,
        };
        let l = listener();
        let socket = l.bind().await.unwrap();
        let target = socket.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender_addr = sender.local_addr().unwrap();

        // Act
        let (outcome, _) = tokio::join!(l.wait_for_peer(&socket, &ctx), async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            sender.send_to(b"hello", target).await.unwrap();
        });

        // Assert
        assert_eq!(outcome, DiscoveryOutcome::Peer(sender_addr));
    }

    #[tokio::test]
    async fn test_lost_link_aborts_discovery() {
        let radio = SimulatedRadio::new(false);
        let signal = ReprovisionSignal::new();
        let running = AtomicBool::new(true);
        let ctx = DiscoveryContext {
            radio: &radio,
            signal: &signal,
            running: &running,
        };

        assert_eq!(listener().discover(&ctx).await, DiscoveryOutcome::LinkLost);
    }

    #[tokio::test]
    async fn test_reprovision_signal_interrupts_receive() {
        // Arrange
        let radio = SimulatedRadio::new(true);
        let signal = Arc::new(ReprovisionSignal::new());
        let running = AtomicBool::new(true);
        let ctx = DiscoveryContext {
            radio: &radio,
            signal: &signal,
            running: &running,
        };
        let l = DiscoveryListener::new(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_secs(60),
            Duration::from_millis(50),
        );
        let trigger = Arc::clone(&signal);

        // Act
        let (outcome, _) = tokio::join!(l.discover(&ctx), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.fire();
        });

        // Assert – well before the 60 s receive timeout
        assert_eq!(outcome, DiscoveryOutcome::Reprovision);
    }

    #[tokio::test]
    async fn test_bind_failure_is_retried_until_aborted() {
        // Arrange – occupy a port so the listener cannot bind it
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let radio = SimulatedRadio::new(true);
        let signal = Arc::new(ReprovisionSignal::new());
        let running = AtomicBool::new(true);
        let ctx = DiscoveryContext {
            radio: &radio,
            signal: &signal,
            running: &running,
        };
        let l = DiscoveryListener::new(addr, Duration::from_millis(100), Duration::from_millis(20));
        let trigger = Arc::clone(&signal);

        // Act
        let (outcome, _) = tokio::join!(l.discover(&ctx), async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.fire();
        });

        // Assert
        assert_eq!(outcome, DiscoveryOutcome::Reprovision);
        drop(taken);
    }
}
