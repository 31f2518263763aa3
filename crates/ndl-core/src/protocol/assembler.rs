//! Streaming reassembly of envelopes from an arbitrary byte stream.
//!
//! TCP and queue pops deliver bytes in chunks that have nothing to do with
//! envelope boundaries: one read may hold half a frame, or three frames and
//! the start of a fourth.  [`EnvelopeAssembler`] accumulates bytes and hands
//! out whole frames as soon as they are complete.
//!
//! When a frame is invalid the assembler drops its first byte and skips ahead
//! to the next [`MAGIC`] byte, which is the next plausible header boundary.
//! Nothing from a damaged frame is ever returned.

use tracing::debug;

use crate::domain::topic::TopicKey;
use crate::protocol::envelope::{decode_envelope_bounded, HEADER_SIZE, MAGIC};

/// A complete, checksum-verified envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFrame {
    key: TopicKey,
    bytes: Vec<u8>,
}

impl AssembledFrame {
    pub fn key(&self) -> TopicKey {
        self.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    /// The whole encoded frame, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Accumulates stream bytes and yields complete envelopes.
#[derive(Debug)]
pub struct EnvelopeAssembler {
    buf: Vec<u8>,
    max_payload: usize,
    invalid_frames: u64,
    discarded_bytes: u64,
}

impl EnvelopeAssembler {
    /// Creates an assembler that rejects frames declaring more than
    /// `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::with_capacity(HEADER_SIZE + max_payload),
            max_payload,
            invalid_frames: 0,
            discarded_bytes: 0,
        }
    }

    /// Appends newly received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<AssembledFrame> {
        loop {
            match decode_envelope_bounded(&self.buf, self.max_payload) {
                Ok((view, consumed)) => {
                    let key = view.key;
                    let bytes: Vec<u8> = self.buf.drain(..consumed).collect();
                    return Some(AssembledFrame { key, bytes });
                }
                Err(e) if e.is_incomplete() => return None,
                Err(e) => {
                    self.invalid_frames += 1;
                    let skipped = self.resync();
                    debug!("dropped invalid envelope ({e}); skipped {skipped} byte(s)");
                }
            }
        }
    }

    /// Bytes held while waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Number of invalid frames dropped so far.
    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames
    }

    /// Number of bytes thrown away while resynchronising.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Forgets any partially received frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drops the current (bad) first byte and everything up to the next magic byte.
    fn resync(&mut self) -> usize {
        let skip = self
            .buf
            .iter()
            .skip(1)
            .position(|&b| b == MAGIC)
            .map(|p| p + 1)
            .unwrap_or(self.buf.len());
        self.buf.drain(..skip);
        self.discarded_bytes += skip as u64;
        skip
    }
}
