//! Domain layer: pure types with no I/O.

pub mod credentials;
pub mod mode;
pub mod queue;
pub mod topic;
