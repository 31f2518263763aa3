//! Infrastructure layer for the bridge runtime.
//!
//! Contains the adapters behind the application ports: UDP discovery and the
//! TCP session, the periodic task scheduler, configuration file storage, and
//! the in-memory stand-ins used when no hardware is attached.
//!
//! **Dependency rule**: this layer may depend on `application` and `ndl_core`,
//! but MUST NOT be imported by the `application` or domain layers.

pub mod mock;
pub mod network;
pub mod scheduler;
pub mod storage;
