//! Bodies of the periodic bridge tasks.
//!
//! Each type here does one cycle of work per call and never waits longer
//! than the serial driver's bounded wait.  `infrastructure::scheduler` runs
//! them on fixed periods; tests call them directly.
//!
//! - [`SerialPoller`] – serial channels → network-bound queue.
//! - [`HostDrain`] – host-bound queue → serial channels.
//! - [`Heartbeat`] – periodic PING into the host-bound queue.
//! - [`StatusUpdater`] – mirrors the mode onto the status indicator.

use std::ops::ControlFlow;
use std::sync::Arc;

use ndl_core::protocol::envelope::{encode_envelope_into, HEADER_SIZE};
use ndl_core::{BridgeQueue, Command, EnvelopeAssembler, Mode, QueueError};
use tracing::{debug, info, trace, warn};

use crate::application::ports::{StatusIndicator, WaitPolicy};
use crate::application::registry::{ChannelRegistry, RouteOutcome};
use crate::application::signal::SharedMode;

// ── Serial → network ──────────────────────────────────────────────────────────

/// Counters from one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub frames: usize,
    pub bytes: usize,
    pub dropped_frames: usize,
}

/// Reads every channel with pending input and queues one envelope per
/// channel for the network.
///
/// A full network-bound queue is normal outside Bridging.  The first drop
/// of an overflow is a warning; later drops are debug output until a push
/// succeeds again.
pub struct SerialPoller {
    registry: Arc<ChannelRegistry>,
    to_network: Arc<BridgeQueue>,
    read_buf: Vec<u8>,
    frame_buf: Vec<u8>,
    /// Frames dropped since the queue last accepted one.
    overflow_drops: usize,
}

impl SerialPoller {
    pub fn new(registry: Arc<ChannelRegistry>, to_network: Arc<BridgeQueue>) -> Self {
        Self {
            registry,
            to_network,
            read_buf: Vec::new(),
            frame_buf: Vec::new(),
            overflow_drops: 0,
        }
    }

    /// Frames dropped in the current overflow; zero when the queue is
    /// accepting.
    pub fn overflow_drops(&self) -> usize {
        self.overflow_drops
    }

    /// Runs one polling cycle.
    pub fn poll_once(&mut self) -> PollStats {
        let mut stats = PollStats::default();
        let Self {
            registry,
            to_network,
            read_buf,
            frame_buf,
            overflow_drops,
        } = self;

        registry.for_each_channel::<()>(|channel| {
            // A frame larger than the whole queue could never be pushed.
            let max = channel
                .topic()
                .max_payload()
                .min(to_network.capacity().saturating_sub(HEADER_SIZE));
            let want = channel.port().available().min(max);
            if want == 0 {
                return ControlFlow::Continue(());
            }

            read_buf.resize(want, 0);
            let n = match channel.port().read(&mut read_buf[..want], WaitPolicy::NoWait) {
                Ok(n) => n,
                Err(e) => {
                    warn!("read from '{}' failed: {e}", channel.topic().name());
                    return ControlFlow::Continue(());
                }
            };
            if n == 0 {
                return ControlFlow::Continue(());
            }

            frame_buf.clear();
            if let Err(e) = encode_envelope_into(channel.key(), &read_buf[..n], max, frame_buf) {
                warn!("cannot frame input from '{}': {e}", channel.topic().name());
                return ControlFlow::Continue(());
            }

            match to_network.push(frame_buf) {
                Ok(()) => {
                    stats.frames += 1;
                    stats.bytes += n;
                    trace!("queued {n} byte(s) from '{}'", channel.topic().name());
                    if *overflow_drops > 0 {
                        info!(
                            "{} accepting again; {} frame(s) were dropped",
                            to_network.name(),
                            *overflow_drops
                        );
                        *overflow_drops = 0;
                    }
                }
                Err(QueueError::Full { requested, free }) => {
                    stats.dropped_frames += 1;
                    *overflow_drops += 1;
                    if *overflow_drops == 1 {
                        warn!(
                            "{} full ({requested} requested, {free} free); dropping serial input",
                            to_network.name()
                        );
                    }
                    debug!("dropped {n} byte(s) from '{}'", channel.topic().name());
                }
            }
            ControlFlow::Continue(())
        });
        stats
    }
}

// ── Network → serial ──────────────────────────────────────────────────────────

/// Counters from one drain cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub to_channels: usize,
    pub to_host_raw: usize,
    pub control_frames: usize,
    pub undeliverable: usize,
}

/// Pops a batch from the host-bound queue and dispatches its envelopes.
///
/// Envelopes for a registered channel go through
/// [`ChannelRegistry::route_inbound`], so the host channel gets its own
/// payloads raw like any other channel.  Any other key is a control frame
/// and is written whole to the host.
pub struct HostDrain {
    registry: Arc<ChannelRegistry>,
    to_host: Arc<BridgeQueue>,
    assembler: EnvelopeAssembler,
    batch: usize,
    write_wait: WaitPolicy,
}

impl HostDrain {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        to_host: Arc<BridgeQueue>,
        max_payload: usize,
        batch: usize,
        write_wait: WaitPolicy,
    ) -> Self {
        Self {
            registry,
            to_host,
            assembler: EnvelopeAssembler::new(max_payload),
            batch,
            write_wait,
        }
    }

    /// Runs one drain cycle.
    pub fn drain_once(&mut self) -> DrainStats {
        let mut stats = DrainStats::default();
        let bytes = self.to_host.pop(self.batch);
        if bytes.is_empty() {
            return stats;
        }
        self.assembler.push(&bytes);

        while let Some(frame) = self.assembler.next_frame() {
            let key = frame.key();
            if !self.registry.contains(key) {
                self.forward_control(frame.as_bytes(), &mut stats);
                continue;
            }
            let raw_to_host = self.registry.host().is_some_and(|host| host.key() == key);
            match self.registry.route_inbound(key, frame.payload(), self.write_wait) {
                RouteOutcome::Delivered if raw_to_host => stats.to_host_raw += 1,
                RouteOutcome::Delivered => stats.to_channels += 1,
                RouteOutcome::UnknownTopic | RouteOutcome::WriteFailed => {
                    stats.undeliverable += 1;
                }
            }
        }
        stats
    }

    /// Writes a whole control envelope to the host channel.
    fn forward_control(&self, envelope: &[u8], stats: &mut DrainStats) {
        let Some(host) = self.registry.host() else {
            debug!("no host channel; dropped control frame of {} byte(s)", envelope.len());
            stats.undeliverable += 1;
            return;
        };
        match host.port().write(envelope, self.write_wait) {
            Ok(()) => stats.control_frames += 1,
            Err(e) => {
                warn!("write to '{}' failed: {e}", host.topic().name());
                stats.undeliverable += 1;
            }
        }
    }
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

/// Enqueues one PING envelope toward the host per beat.
pub struct Heartbeat {
    to_host: Arc<BridgeQueue>,
    frame: Vec<u8>,
}

impl Heartbeat {
    pub fn new(to_host: Arc<BridgeQueue>) -> Self {
        // One-byte payload on a one-byte topic cannot fail to encode.
        let frame = Command::Ping.to_envelope().unwrap_or_default();
        Self { to_host, frame }
    }

    /// # Errors
    ///
    /// [`QueueError::Full`] if the host-bound queue has no room; the beat is
    /// lost and the next one is tried on schedule.
    pub fn beat(&self) -> Result<(), QueueError> {
        self.to_host.push(&self.frame)
    }
}

// ── Status indicator ──────────────────────────────────────────────────────────

/// Writes the indicator pattern whenever the sampled mode changes.
pub struct StatusUpdater {
    indicator: Arc<dyn StatusIndicator>,
    mode: Arc<SharedMode>,
    shown: Option<Mode>,
}

impl StatusUpdater {
    pub fn new(indicator: Arc<dyn StatusIndicator>, mode: Arc<SharedMode>) -> Self {
        Self {
            indicator,
            mode,
            shown: None,
        }
    }

    /// Samples the mode; returns `true` if the indicator was updated.
    pub fn sample(&mut self) -> bool {
        let mode = self.mode.get();
        if self.shown == Some(mode) {
            return false;
        }
        let pattern = mode.indicator_pattern();
        self.indicator.set_blink_rate(pattern.blink_hz);
        self.indicator.set_intensity(pattern.intensity);
        self.shown = Some(mode);
        debug!("indicator now {mode:?}: {} Hz at {}", pattern.blink_hz, pattern.intensity);
        true
    }
}
