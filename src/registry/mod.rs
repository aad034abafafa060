//! Node Registry Module
//!
//! In-memory registry of the nodes connected to a router, read by every
//! routing decision and mutated by connection lifecycle events.

pub mod events;
pub mod node_registry;

pub use events::*;
pub use node_registry::*;
