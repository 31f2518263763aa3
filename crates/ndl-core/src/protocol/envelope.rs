//! Binary codec for topic-tagged envelopes.
//!
//! Wire format:
//! ```text
//! [magic:1][topic_key:4][payload_len:2][!payload_len:2][crc32:4][payload:N]
//! ```
//! Total header size: 13 bytes.  All multi-byte integers are little-endian.
//!
//! The length is stored twice, the second copy bitwise inverted, so a damaged
//! length is rejected at once instead of making the reader wait for bytes
//! that will never come.  The CRC-32 covers every header byte after the magic
//! plus the payload, which means any single flipped bit in a frame makes it
//! invalid.  Multi-bit damage can still collide with the CRC with a
//! probability of roughly 2^-32; callers must not treat a valid checksum as
//! proof of authenticity.
//!
//! Decoding is pure.  It never allocates and never consumes input; the caller
//! decides what to do with `Incomplete` (read more) or an invalid frame
//! (resynchronise, see [`crate::protocol::assembler`]).

use crc32fast::Hasher;
use thiserror::Error;

use crate::domain::topic::TopicKey;

/// First byte of every envelope.
pub const MAGIC: u8 = 0xA5;

/// Size of the envelope header in bytes.
pub const HEADER_SIZE: usize = 13;

/// Largest payload the 16-bit length field can describe.
pub const MAX_WIRE_PAYLOAD: usize = u16::MAX as usize;

/// Errors that can occur during envelope encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The buffer ends before the frame does.  Not a corruption: supply more
    /// bytes and decode again.
    #[error("incomplete envelope: need {needed} bytes, got {available}")]
    Incomplete { needed: usize, available: usize },

    /// The first byte is not [`MAGIC`].
    #[error("bad magic byte: 0x{0:02X}")]
    BadMagic(u8),

    /// The length field and its complement disagree.
    #[error("length field failed its complement check")]
    LengthCheck,

    /// The payload is larger than the permitted maximum.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The CRC-32 in the header does not match the frame contents.
    #[error("checksum mismatch: header 0x{declared:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch { declared: u32, computed: u32 },
}

impl EnvelopeError {
    /// `true` when more bytes may turn this into a valid frame.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, EnvelopeError::Incomplete { .. })
    }
}

/// A decoded envelope borrowing its payload from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeView<'a> {
    pub key: TopicKey,
    pub payload: &'a [u8],
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `payload` under `key` into a complete envelope.
///
/// `max_payload` is the channel's configured limit; anything larger is
/// rejected rather than truncated.
///
/// # Errors
///
/// Returns [`EnvelopeError::PayloadTooLarge`] if `payload` exceeds
/// `max_payload` or the 16-bit wire limit.
///
/// # Examples
///
/// ```rust
/// use ndl_core::protocol::envelope::{decode_envelope, encode_envelope};
/// use ndl_core::TopicKey;
///
/// let key = TopicKey::from_name("uart1");
/// let bytes = encode_envelope(key, &[1, 2, 3], 4096).unwrap();
/// let (view, consumed) = decode_envelope(&bytes).unwrap();
/// assert_eq!(view.key, key);
/// assert_eq!(view.payload, &[1, 2, 3]);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_envelope(
    key: TopicKey,
    payload: &[u8],
    max_payload: usize,
) -> Result<Vec<u8>, EnvelopeError> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    encode_envelope_into(key, payload, max_payload, &mut buf)?;
    Ok(buf)
}

/// Appends an encoded envelope to `out`.  On error `out` is left untouched.
///
/// # Errors
///
/// See [`encode_envelope`].
pub fn encode_envelope_into(
    key: TopicKey,
    payload: &[u8],
    max_payload: usize,
    out: &mut Vec<u8>,
) -> Result<(), EnvelopeError> {
    let max = max_payload.min(MAX_WIRE_PAYLOAD);
    if payload.len() > max {
        return Err(EnvelopeError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }

    let len = payload.len() as u16;
    let mut fields = [0u8; 8];
    fields[0..4].copy_from_slice(&key.to_le_bytes());
    fields[4..6].copy_from_slice(&len.to_le_bytes());
    fields[6..8].copy_from_slice(&(!len).to_le_bytes());

    out.reserve(HEADER_SIZE + payload.len());
    out.push(MAGIC);
    out.extend_from_slice(&fields);
    out.extend_from_slice(&checksum(&fields, payload).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Decodes one envelope from the beginning of `bytes`, accepting any payload
/// the wire format can describe.
///
/// Returns the envelope and the number of bytes it occupies, so the caller
/// can advance its read cursor.
///
/// # Errors
///
/// [`EnvelopeError::Incomplete`] if `bytes` holds only a prefix of a frame;
/// any other variant means the frame is invalid and must be discarded.
pub fn decode_envelope(bytes: &[u8]) -> Result<(EnvelopeView<'_>, usize), EnvelopeError> {
    decode_envelope_bounded(bytes, MAX_WIRE_PAYLOAD)
}

/// Like [`decode_envelope`] but rejects payloads above `max_payload` before
/// waiting for them to arrive.
///
/// # Errors
///
/// See [`decode_envelope`].
pub fn decode_envelope_bounded(
    bytes: &[u8],
    max_payload: usize,
) -> Result<(EnvelopeView<'_>, usize), EnvelopeError> {
    let Some(&first) = bytes.first() else {
        return Err(EnvelopeError::Incomplete {
            needed: HEADER_SIZE,
            available: 0,
        });
    };
    if first != MAGIC {
        return Err(EnvelopeError::BadMagic(first));
    }
    if bytes.len() < HEADER_SIZE {
        return Err(EnvelopeError::Incomplete {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let fields = &bytes[1..9];
    let len = u16::from_le_bytes([fields[4], fields[5]]);
    let len_inv = u16::from_le_bytes([fields[6], fields[7]]);
    if len != !len_inv {
        return Err(EnvelopeError::LengthCheck);
    }

    let len = len as usize;
    if len > max_payload {
        return Err(EnvelopeError::PayloadTooLarge {
            len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + len;
    if bytes.len() < total {
        return Err(EnvelopeError::Incomplete {
            needed: total,
            available: bytes.len(),
        });
    }

    let declared = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
    let payload = &bytes[HEADER_SIZE..total];
    let computed = checksum(fields, payload);
    if declared != computed {
        return Err(EnvelopeError::ChecksumMismatch { declared, computed });
    }

    let key = TopicKey::from_le_bytes([fields[0], fields[1], fields[2], fields[3]]);
    Ok((EnvelopeView { key, payload }, total))
}

fn checksum(fields: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(fields);
    hasher.update(payload);
    hasher.finalize()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
