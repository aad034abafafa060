//! Registry Events
//!
//! Events emitted by the node registry for external consumers to react to
//! node lifecycle changes.

use serde::{Deserialize, Serialize};

/// Events emitted by the node registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A node finished its handshake (or reconnected under the same id)
    NodeConnected {
        node_id: String,
        address: String,
        service_name: Option<String>,
    },

    /// A node left or its link failed
    NodeDisconnected { node_id: String },

    /// A node replaced its declared options
    NodeOptionsUpdated { node_id: String },
}

impl RegistryEvent {
    pub fn node_id(&self) -> &str {
        match self {
            RegistryEvent::NodeConnected { node_id, .. }
            | RegistryEvent::NodeDisconnected { node_id }
            | RegistryEvent::NodeOptionsUpdated { node_id } => node_id,
        }
    }
}
