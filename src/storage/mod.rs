//! Storage Module
//!
//! Bundled [`Storage`](crate::domain::ports::Storage) implementations and
//! the typed peer router set built on top of them.

pub mod collections;
pub mod file;
pub mod memory;
pub mod peers;

pub use collections::{Collections, NETWORKS_COLLECTION, ROUTERS_COLLECTION};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use peers::{PeerRecord, PeerRouterSet};
