//! Network Events

use crate::domain::ports::NodeId;
use serde::{Deserialize, Serialize};

/// Router membership changes seen by a network service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// A router announced itself and was connected
    NewRouter { address: String },
    /// A router link broke; the router left the peer set
    RouterFail { id: NodeId, address: String },
    /// A router shut down gracefully
    RouterStop { id: NodeId, address: String },
    /// A failed router came back and rejoined the peer set
    RouterReconnect { id: NodeId, address: String },
    /// Reconnection to a failed router was abandoned
    RouterReconnectFailure { address: String },
}

impl NetworkEvent {
    pub fn address(&self) -> &str {
        match self {
            NetworkEvent::NewRouter { address }
            | NetworkEvent::RouterFail { address, .. }
            | NetworkEvent::RouterStop { address, .. }
            | NetworkEvent::RouterReconnect { address, .. }
            | NetworkEvent::RouterReconnectFailure { address } => address,
        }
    }
}
