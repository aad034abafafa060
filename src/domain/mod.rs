//! Domain layer - Envelopes and port definitions
//!
//! This module defines the message envelope routed by the mesh and the core
//! traits (ports) that transports, storages and metric sources implement.

pub mod envelope;
pub mod ports;

pub use envelope::*;
pub use ports::*;
