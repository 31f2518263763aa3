//! Control-topic payloads exchanged with the host-facing channel.
//!
//! Two fixed topics carry control traffic next to the data channels:
//!
//! - [`COMMAND_TOPIC`] – a single command byte, e.g. the periodic heartbeat.
//! - [`WIFI_CONFIG_TOPIC`] – a one-shot report of the credentials that were
//!   applied after a successful provisioning run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::credentials::{Credentials, CredentialsError};
use crate::domain::topic::{Topic, TopicKey};
use crate::protocol::envelope::{encode_envelope, EnvelopeError};

/// Name of the heartbeat / command topic.
pub const COMMAND_TOPIC: &str = "command";

/// Name of the credentials-applied report topic.
pub const WIFI_CONFIG_TOPIC: &str = "wifi_config";

/// Errors decoding control payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("unknown command code: {0}")]
    UnknownCommand(u8),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Single-byte command codes on [`COMMAND_TOPIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Ping = 0,
    Reboot = 1,
}

impl TryFrom<u8> for Command {
    type Error = ControlError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Ping),
            1 => Ok(Command::Reboot),
            other => Err(ControlError::UnknownCommand(other)),
        }
    }
}

impl Command {
    /// Topic carrying command envelopes.
    pub fn topic() -> Topic {
        Topic::new(COMMAND_TOPIC, 1)
    }

    pub fn topic_key() -> TopicKey {
        TopicKey::from_name(COMMAND_TOPIC)
    }

    /// Encodes this command as a complete envelope.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the payload is one byte.
    pub fn to_envelope(self) -> Result<Vec<u8>, ControlError> {
        Ok(encode_envelope(Self::topic_key(), &[self as u8], 1)?)
    }

    /// Decodes a command from an envelope payload.
    ///
    /// # Errors
    ///
    /// [`ControlError::MalformedPayload`] unless the payload is exactly one
    /// byte, [`ControlError::UnknownCommand`] for unassigned codes.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ControlError> {
        match payload {
            [code] => Command::try_from(*code),
            _ => Err(ControlError::MalformedPayload(format!(
                "command payload must be 1 byte, got {}",
                payload.len()
            ))),
        }
    }
}

// ── Credentials report ────────────────────────────────────────────────────────

/// Topic carrying the credentials-applied report.
pub fn wifi_config_topic() -> Topic {
    Topic::new(WIFI_CONFIG_TOPIC, Credentials::ENCODED_MAX)
}

/// Encodes `creds` as `[ssid_len:1][ssid][password_len:1][password]`.
pub fn encode_credentials(creds: &Credentials) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + creds.ssid().len() + creds.password().len());
    buf.push(creds.ssid().len() as u8);
    buf.extend_from_slice(creds.ssid());
    buf.push(creds.password().len() as u8);
    buf.extend_from_slice(creds.password());
    buf
}

/// Decodes a credentials report payload.
///
/// # Errors
///
/// [`ControlError::MalformedPayload`] on truncation or trailing bytes, and
/// [`ControlError::Credentials`] if a field exceeds its maximum length.
pub fn decode_credentials(payload: &[u8]) -> Result<Credentials, ControlError> {
    let (ssid, rest) = read_length_prefixed(payload, "ssid")?;
    let (password, rest) = read_length_prefixed(rest, "password")?;
    if !rest.is_empty() {
        return Err(ControlError::MalformedPayload(format!(
            "{} trailing byte(s) after credentials",
            rest.len()
        )));
    }
    Ok(Credentials::new(ssid, password)?)
}

/// Encodes the credentials-applied report as a complete envelope.
///
/// # Errors
///
/// Propagates [`EnvelopeError`] from the codec.
pub fn credentials_report_envelope(creds: &Credentials) -> Result<Vec<u8>, ControlError> {
    let topic = wifi_config_topic();
    Ok(encode_envelope(
        topic.key(),
        &encode_credentials(creds),
        topic.max_payload(),
    )?)
}

fn read_length_prefixed<'a>(
    p: &'a [u8],
    field: &str,
) -> Result<(&'a [u8], &'a [u8]), ControlError> {
    let (&len, rest) = p
        .split_first()
        .ok_or_else(|| ControlError::MalformedPayload(format!("missing {field} length")))?;
    let len = len as usize;
    if rest.len() < len {
        return Err(ControlError::MalformedPayload(format!(
            "{field} truncated: need {len} bytes, got {}",
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}
