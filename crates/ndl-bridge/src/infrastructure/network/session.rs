//! TCP bridging session with the discovered peer.
//!
//! One session runs at a time.  The loop waits, with a bounded timeout, for
//! whichever comes first:
//!
//! - the re-provision signal, which ends the session at once, even with a
//!   send in flight;
//! - read readiness: drain the socket into the envelope assembler and queue
//!   every complete envelope for a registered channel toward the host.  A
//!   zero-length read means the peer closed the connection;
//! - write readiness, only while an envelope is waiting: write as much of it
//!   as the socket accepts and keep the rest;
//! - the poll tick, after which the network-bound queue is checked again.
//!
//! Before every wait the loop also gives up on shutdown, on a re-provision
//! request, and when the radio has lost its association.
//!
//! # Outbound envelopes
//!
//! Bytes popped from the network-bound queue are cut into whole envelopes
//! before they are written, and whatever has not been written when a
//! session ends is kept for the next one.  The only envelope that can be
//! lost is the one cut off mid-write by the end of a connection; the next
//! peer never sees its tail.
//!
//! # Keep-alive
//!
//! `TCP_NODELAY` and `SO_KEEPALIVE` are enabled on every session socket,
//! with the idle time, retry interval and retry count from
//! [`KeepaliveSettings`].  A peer that vanishes without closing the
//! connection fails the next read after the last unanswered keep-alive packet.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ndl_core::protocol::envelope::MAX_WIRE_PAYLOAD;
use ndl_core::{BridgeQueue, EnvelopeAssembler};
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, trace, warn};

use crate::application::connectivity::SessionEnd;
use crate::application::ports::Radio;
use crate::application::registry::ChannelRegistry;
use crate::application::signal::ReprovisionSignal;

const READ_BUF: usize = 4096;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),
}

/// TCP keep-alive timings applied to the session socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    /// Silence before the first keep-alive packet.
    pub idle: Duration,
    /// Gap between unanswered keep-alive packets.
    pub interval: Duration,
    /// Unanswered keep-alive packets before the connection is dropped.
    pub retries: u32,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(5),
            interval: Duration::from_secs(1),
            retries: 5,
        }
    }
}

impl KeepaliveSettings {
    fn to_socket(self) -> TcpKeepalive {
        let params = TcpKeepalive::new().with_time(self.idle);
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
        ))]
        let params = params.with_interval(self.interval).with_retries(self.retries);
        #[cfg(windows)]
        let params = params.with_interval(self.interval);
        params
    }
}

/// Session timing and batching.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    /// Upper bound on one wait of the loop.
    pub poll_interval: Duration,
    /// Most bytes popped from the network-bound queue at once.
    pub send_batch: usize,
    /// Largest inbound payload accepted.
    pub max_payload: usize,
    pub keepalive: KeepaliveSettings,
}

/// Collaborators a session checks before every wait.
pub struct SessionContext<'a> {
    pub radio: &'a dyn Radio,
    pub signal: &'a ReprovisionSignal,
    pub running: &'a AtomicBool,
}

impl SessionContext<'_> {
    fn abort_reason(&self) -> Option<SessionEnd> {
        if !self.running.load(Ordering::SeqCst) {
            Some(SessionEnd::Stopped)
        } else if self.signal.is_requested() {
            Some(SessionEnd::Reprovision)
        } else if !self.radio.is_connected() {
            Some(SessionEnd::LinkLost)
        } else {
            None
        }
    }
}

/// Network-bound envelopes popped from the queue but not yet written.
#[derive(Debug)]
struct Outbox {
    /// Cuts popped bytes into envelopes; holds a trailing partial one.
    splitter: EnvelopeAssembler,
    frames: VecDeque<Vec<u8>>,
    /// Bytes of the front frame already written on this connection.
    written: usize,
}

impl Default for Outbox {
    fn default() -> Self {
        Self {
            splitter: EnvelopeAssembler::new(MAX_WIRE_PAYLOAD),
            frames: VecDeque::new(),
            written: 0,
        }
    }
}

impl Outbox {
    /// Pops up to `batch` bytes when no whole envelope is waiting.
    fn refill(&mut self, queue: &BridgeQueue, batch: usize) {
        if !self.frames.is_empty() {
            return;
        }
        let bytes = queue.pop(batch);
        if bytes.is_empty() {
            return;
        }
        self.splitter.push(&bytes);
        while let Some(frame) = self.splitter.next_frame() {
            self.frames.push_back(frame.into_bytes());
        }
    }

    fn has_frame(&self) -> bool {
        !self.frames.is_empty()
    }

    /// The unwritten part of the front frame.
    fn unwritten(&self) -> &[u8] {
        self.frames
            .front()
            .map_or(&[][..], |frame| &frame[self.written..])
    }

    fn advance(&mut self, n: usize) {
        self.written += n;
        if self
            .frames
            .front()
            .is_some_and(|frame| self.written >= frame.len())
        {
            self.frames.pop_front();
            self.written = 0;
        }
    }

    /// Drops a frame cut off mid-write; its tail must not start the next
    /// connection.
    fn end_connection(&mut self) {
        if self.written > 0 {
            debug!("dropping envelope cut off after {} byte(s)", self.written);
            self.frames.pop_front();
            self.written = 0;
        }
    }

    fn pending_bytes(&self) -> usize {
        self.frames.iter().map(Vec::len).sum::<usize>() - self.written
            + self.splitter.buffered()
    }
}

pub struct BridgeSession {
    registry: Arc<ChannelRegistry>,
    to_network: Arc<BridgeQueue>,
    to_host: Arc<BridgeQueue>,
    settings: SessionSettings,
    outbox: Mutex<Outbox>,
}

impl BridgeSession {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        to_network: Arc<BridgeQueue>,
        to_host: Arc<BridgeQueue>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry,
            to_network,
            to_host,
            settings,
            outbox: Mutex::new(Outbox::default()),
        }
    }

    /// Opens a keep-alive, no-delay connection to `addr`.
    ///
    /// # Errors
    ///
    /// [`SessionError`] if the socket cannot be created or the connection
    /// does not complete within the connect timeout.
    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, SessionError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(SessionError::Socket)?;

        let stream = tokio::time::timeout(self.settings.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| SessionError::ConnectTimeout(addr))?
            .map_err(|source| SessionError::Connect { addr, source })?;
        stream.set_nodelay(true).map_err(SessionError::Socket)?;
        SockRef::from(&stream)
            .set_tcp_keepalive(&self.settings.keepalive.to_socket())
            .map_err(SessionError::Socket)?;
        Ok(stream)
    }

    /// Connects to `addr` and runs the session until it ends.
    pub async fn run(&self, addr: SocketAddr, ctx: &SessionContext<'_>) -> SessionEnd {
        if let Some(reason) = ctx.abort_reason() {
            return reason;
        }
        let stream = tokio::select! {
            biased;
            _ = ctx.signal.fired() => return SessionEnd::Reprovision,
            connected = self.connect(addr) => match connected {
                Ok(stream) => stream,
                Err(e) => return SessionEnd::ConnectFailed(e.to_string()),
            },
        };
        info!("session established with {addr}");
        let end = self.serve(stream, ctx).await;
        info!("session with {addr} ended: {end:?}");
        end
    }

    /// Runs the bridging loop over an established connection.
    pub async fn serve(&self, stream: TcpStream, ctx: &SessionContext<'_>) -> SessionEnd {
        let mut outbox = std::mem::take(&mut *self.lock_outbox());
        let end = self.serve_with(&stream, &mut outbox, ctx).await;
        outbox.end_connection();
        let carried = outbox.pending_bytes();
        if carried > 0 {
            debug!("keeping {carried} network-bound byte(s) for the next session");
        }
        *self.lock_outbox() = outbox;
        end
    }

    async fn serve_with(
        &self,
        stream: &TcpStream,
        outbox: &mut Outbox,
        ctx: &SessionContext<'_>,
    ) -> SessionEnd {
        let mut assembler = EnvelopeAssembler::new(self.settings.max_payload);
        let mut read_buf = vec![0u8; READ_BUF];

        loop {
            if let Some(reason) = ctx.abort_reason() {
                return reason;
            }
            outbox.refill(&self.to_network, self.settings.send_batch);

            tokio::select! {
                biased;
                _ = ctx.signal.fired() => return SessionEnd::Reprovision,

                ready = stream.readable() => {
                    if let Err(e) = ready {
                        return SessionEnd::Io(e.to_string());
                    }
                    match stream.try_read(&mut read_buf) {
                        Ok(0) => return SessionEnd::PeerClosed,
                        Ok(n) => {
                            trace!("received {n} byte(s)");
                            assembler.push(&read_buf[..n]);
                            self.dispatch_inbound(&mut assembler);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => return SessionEnd::Io(e.to_string()),
                    }
                }

                ready = stream.writable(), if outbox.has_frame() => {
                    if let Err(e) = ready {
                        return SessionEnd::Io(e.to_string());
                    }
                    match stream.try_write(outbox.unwritten()) {
                        Ok(n) => {
                            trace!("sent {n} of {} byte(s)", outbox.unwritten().len());
                            outbox.advance(n);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => return SessionEnd::Io(e.to_string()),
                    }
                }

                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    /// Queues every complete inbound envelope for a registered channel.
    fn dispatch_inbound(&self, assembler: &mut EnvelopeAssembler) {
        while let Some(frame) = assembler.next_frame() {
            let key = frame.key();
            if !self.registry.contains(key) {
                debug!("dropping inbound envelope for unknown topic {key}");
                continue;
            }
            if let Err(e) = self.to_host.push(frame.as_bytes()) {
                warn!("inbound envelope for {key} dropped: {e}");
            }
        }
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
