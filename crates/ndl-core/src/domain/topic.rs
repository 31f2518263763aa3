//! Topic identities used to tag envelopes.
//!
//! A topic is a named logical channel.  Its key is the CRC-32 of the name, so
//! both ends of the link derive the same key from the same name without any
//! negotiation.  CRC-32 is not collision-free; uniqueness among the topics of
//! one bridge is enforced by the channel registry at registration time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable 32-bit key identifying a topic on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicKey(pub u32);

impl TopicKey {
    /// Derives the key for a topic name.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ndl_core::TopicKey;
    ///
    /// assert_eq!(TopicKey::from_name("uart1"), TopicKey::from_name("uart1"));
    /// assert_ne!(TopicKey::from_name("uart1"), TopicKey::from_name("uart2"));
    /// ```
    pub fn from_name(name: &str) -> Self {
        TopicKey(crc32fast::hash(name.as_bytes()))
    }

    /// Little-endian wire representation.
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        TopicKey(u32::from_le_bytes(bytes))
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// A named topic with a maximum payload size per envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    name: String,
    key: TopicKey,
    max_payload: usize,
}

impl Topic {
    /// Creates a topic, deriving its key from `name`.
    pub fn new(name: impl Into<String>, max_payload: usize) -> Self {
        let name = name.into();
        let key = TopicKey::from_name(&name);
        Self {
            name,
            key,
            max_payload,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> TopicKey {
        self.key
    }

    /// Largest payload a single envelope on this topic may carry.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}
