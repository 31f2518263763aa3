//! Protocol module containing the envelope codec, the streaming assembler,
//! and the control-topic payloads.

pub mod assembler;
pub mod control;
pub mod envelope;

pub use assembler::{AssembledFrame, EnvelopeAssembler};
pub use control::{Command, ControlError};
pub use envelope::{decode_envelope, encode_envelope, EnvelopeError, EnvelopeView};
