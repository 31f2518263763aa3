//! Channel registry: the serial channels bound to topics.
//!
//! Channels are registered once at startup and the registry is then shared
//! read-only (behind an `Arc`) by the poll, drain and session tasks.  Lookup
//! is a linear scan over a contiguous `Vec`; a bridge has a handful of
//! channels at most.

use std::ops::ControlFlow;
use std::sync::Arc;

use ndl_core::protocol::control::{COMMAND_TOPIC, WIFI_CONFIG_TOPIC};
use ndl_core::{Topic, TopicKey};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::ports::{SerialPort, WaitPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("topic key {key} of '{name}' is already registered")]
    DuplicateKey { name: String, key: TopicKey },

    #[error("topic key {key} of '{name}' collides with a control topic")]
    ReservedKey { name: String, key: TopicKey },

    #[error("a host channel is already registered")]
    HostAlreadyRegistered,
}

/// A serial endpoint bound to a topic.
pub struct Channel {
    topic: Topic,
    port: Arc<dyn SerialPort>,
    is_host: bool,
}

impl Channel {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn key(&self) -> TopicKey {
        self.topic.key()
    }

    pub fn port(&self) -> &Arc<dyn SerialPort> {
        &self.port
    }

    /// `true` for the host-facing channel.
    pub fn is_host(&self) -> bool {
        self.is_host
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("is_host", &self.is_host)
            .finish_non_exhaustive()
    }
}

/// Result of routing one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    UnknownTopic,
    WriteFailed,
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    host: Option<usize>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a serial channel bound to `topic`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateKey`] if a channel already uses the key, and
    /// [`RegistryError::ReservedKey`] if it collides with a control topic.
    pub fn register(
        &mut self,
        topic: Topic,
        port: Arc<dyn SerialPort>,
    ) -> Result<usize, RegistryError> {
        self.insert(topic, port, false)
    }

    /// Adds the host-facing channel.  Exactly one may exist.
    ///
    /// # Errors
    ///
    /// As [`register`](Self::register), plus
    /// [`RegistryError::HostAlreadyRegistered`].
    pub fn register_host(
        &mut self,
        topic: Topic,
        port: Arc<dyn SerialPort>,
    ) -> Result<usize, RegistryError> {
        if self.host.is_some() {
            return Err(RegistryError::HostAlreadyRegistered);
        }
        let index = self.insert(topic, port, true)?;
        self.host = Some(index);
        Ok(index)
    }

    fn insert(
        &mut self,
        topic: Topic,
        port: Arc<dyn SerialPort>,
        is_host: bool,
    ) -> Result<usize, RegistryError> {
        let key = topic.key();
        if key == TopicKey::from_name(COMMAND_TOPIC) || key == TopicKey::from_name(WIFI_CONFIG_TOPIC)
        {
            return Err(RegistryError::ReservedKey {
                name: topic.name().to_string(),
                key,
            });
        }
        if self.contains(key) {
            return Err(RegistryError::DuplicateKey {
                name: topic.name().to_string(),
                key,
            });
        }
        debug!("registered channel '{}' as {key}", topic.name());
        self.channels.push(Channel {
            topic,
            port,
            is_host,
        });
        Ok(self.channels.len() - 1)
    }

    pub fn find(&self, key: TopicKey) -> Option<&Channel> {
        self.channels.iter().find(|c| c.key() == key)
    }

    pub fn contains(&self, key: TopicKey) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn host(&self) -> Option<&Channel> {
        self.host.and_then(|i| self.channels.get(i))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Visits channels in registration order until the visitor breaks.
    pub fn for_each_channel<B>(
        &self,
        mut visitor: impl FnMut(&Channel) -> ControlFlow<B>,
    ) -> Option<B> {
        for channel in &self.channels {
            if let ControlFlow::Break(b) = visitor(channel) {
                return Some(b);
            }
        }
        None
    }

    /// Writes `payload` to the channel bound to `key`.
    ///
    /// Unknown keys are dropped with a diagnostic; nothing is returned to the
    /// network layer as an error so one bad topic cannot stall the stream.
    pub fn route_inbound(&self, key: TopicKey, payload: &[u8], wait: WaitPolicy) -> RouteOutcome {
        let Some(channel) = self.find(key) else {
            debug!("dropping {} byte(s) for unknown topic {key}", payload.len());
            return RouteOutcome::UnknownTopic;
        };
        match channel.port.write(payload, wait) {
            Ok(()) => RouteOutcome::Delivered,
            Err(e) => {
                warn!("write to '{}' failed: {e}", channel.topic.name());
                RouteOutcome::WriteFailed
            }
        }
    }
}
