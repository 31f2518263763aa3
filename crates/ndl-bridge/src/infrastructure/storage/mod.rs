//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file, fills in
//! defaults for anything left out, validates the result, and can write a
//! configuration back to disk.  A missing file is not an error; the bridge
//! runs on defaults.

pub mod config;
