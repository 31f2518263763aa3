//! # ndl-core
//!
//! Shared library for NetDebugLink containing the envelope codec, topic
//! identities, bridge queues, and the connectivity state machine.
//!
//! This crate has zero dependencies on sockets, radios, or serial drivers.
//! Everything that touches hardware lives in `ndl-bridge` behind traits.
//!
//! # Architecture overview (for beginners)
//!
//! NetDebugLink is a bridge: several serial channels (UARTs plus one
//! host-facing virtual serial port) are multiplexed onto a single TCP
//! session.  Each channel is bound to a *topic*; every chunk of bytes read
//! from a channel is wrapped in an *envelope* tagged with that topic's key,
//! so the far end can split the single stream back into channels.
//!
//! - **`protocol`** – How bytes travel inside the multiplexed stream.
//!   Envelopes are a 13-byte header (magic, topic key, length, checksum)
//!   followed by the payload.  The assembler turns an arbitrary byte stream
//!   back into whole envelopes.
//!
//! - **`domain`** – Pure types with no I/O: topics, credentials, the bounded
//!   bridge queue, and the mode state machine that decides whether the bridge
//!   is provisioning, scanning for a peer, or bridging.

pub mod domain;
pub mod protocol;

pub use domain::credentials::{Credentials, CredentialsError};
pub use domain::mode::{ConnectivityEvent, IndicatorPattern, Mode, ModeMachine};
pub use domain::queue::{BridgeQueue, QueueError};
pub use domain::topic::{Topic, TopicKey};
pub use protocol::assembler::{AssembledFrame, EnvelopeAssembler};
pub use protocol::control::{Command, ControlError};
pub use protocol::envelope::{decode_envelope, encode_envelope, EnvelopeError};
