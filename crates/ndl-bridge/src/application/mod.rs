//! Application layer use cases for the bridge runtime.
//!
//! # What lives here? (for beginners)
//!
//! - **`ports`** – The traits every external collaborator implements: serial
//!   ports, the radio, the status LED, the button, and the out-of-band
//!   credential transport.  Nothing in this layer knows how they work.
//!
//! - **`registry`** – The serial channels and the topic each one is bound to.
//!
//! - **`signal`** – The re-provision request (the only way to cancel a
//!   running phase), the button debouncer, and the shared mode value.
//!
//! - **`pump`** – One cycle of each periodic task: poll serial input into the
//!   network-bound queue, drain the host-bound queue to the serial ports, send
//!   heartbeats, update the status LED.
//!
//! - **`provisioning`** – The bounded-time handshake that receives network
//!   credentials and hands them to the radio.
//!
//! - **`connectivity`** – The control loop that moves between provisioning,
//!   discovery and bridging.

pub mod connectivity;
pub mod ports;
pub mod provisioning;
pub mod pump;
pub mod registry;
pub mod signal;
