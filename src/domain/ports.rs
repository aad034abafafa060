//! Domain Ports - Collaborator traits for the mesh
//!
//! These traits define the boundaries between the dispatch core and the
//! outside world. The transport moves frames between nodes, the storage
//! persists peer router sets and the latency source feeds the
//! latency-optimized strategy.

use crate::error::{Error, RemoteError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

// =============================================================================
// Node Options
// =============================================================================

/// Declared options of a node (arbitrary JSON fields)
pub type NodeOptions = serde_json::Map<String, Value>;

/// Option key carrying the service name of a node
pub const SERVICE_NAME_KEY: &str = "serviceName";

/// Option key carrying the semver version of a node
pub const VERSION_KEY: &str = "version";

// =============================================================================
// Node ID
// =============================================================================

/// Unique identifier for a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id such as `router::5f0c...`
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}::{}", prefix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for NodeId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

// =============================================================================
// Links and Replies
// =============================================================================

/// A live link to a remote node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLink {
    /// Id announced by the remote node during the handshake
    pub id: NodeId,
    /// Address the link was opened to (or accepted from)
    pub address: String,
}

/// Outcome of a request as seen by the requester
pub type Reply = std::result::Result<Value, RemoteError>;

/// Answers exactly one inbound request
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Reply>,
}

impl Responder {
    /// Create a responder and the receiving half the transport waits on
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Send a successful reply. Returns false if nobody waits anymore.
    pub fn reply(self, data: Value) -> bool {
        self.tx.send(Ok(data)).is_ok()
    }

    /// Reject the request with the given error
    pub fn fail(self, error: &Error) -> bool {
        self.tx.send(Err(RemoteError::from(error))).is_ok()
    }
}

// =============================================================================
// Transport Events
// =============================================================================

/// Events raised by a transport towards its owner
#[derive(Debug)]
pub enum TransportEvent {
    /// A client finished its handshake with our listener
    ClientConnected {
        id: NodeId,
        address: String,
        options: NodeOptions,
    },
    /// A client link broke without a goodbye
    ClientFailure { id: NodeId, address: String },
    /// A client said goodbye
    ClientStop { id: NodeId, address: String },
    /// A client pushed new options
    OptionsSync { id: NodeId, options: NodeOptions },
    /// A server link broke; reconnection is in progress
    ServerFailure { id: NodeId, address: String },
    /// A server said goodbye
    ServerStop { id: NodeId, address: String },
    /// A failed server link was re-established
    ServerReconnect { id: NodeId, address: String },
    /// Reconnection to a failed server was abandoned
    ServerReconnectFailure { address: String },
    /// A new server link was opened
    ConnectToServer { id: NodeId, address: String },
    /// Inbound fire-and-forget message
    Tick {
        from: NodeId,
        event: String,
        data: Value,
    },
    /// Inbound request waiting for one reply
    Request {
        from: NodeId,
        event: String,
        data: Value,
        responder: Responder,
    },
}

impl TransportEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::ClientConnected { .. } => "client_connected",
            TransportEvent::ClientFailure { .. } => "client_failure",
            TransportEvent::ClientStop { .. } => "client_stop",
            TransportEvent::OptionsSync { .. } => "options_sync",
            TransportEvent::ServerFailure { .. } => "server_failure",
            TransportEvent::ServerStop { .. } => "server_stop",
            TransportEvent::ServerReconnect { .. } => "server_reconnect",
            TransportEvent::ServerReconnectFailure { .. } => "server_reconnect_failure",
            TransportEvent::ConnectToServer { .. } => "connect_to_server",
            TransportEvent::Tick { .. } => "tick",
            TransportEvent::Request { .. } => "request",
        }
    }
}

// =============================================================================
// Transport Port
// =============================================================================

/// Moves messages between this node and its peers.
///
/// A node is both a server (clients connect to its bound address) and a
/// client (it connects to other nodes' addresses). `tick` and `request`
/// address peers by id on either side.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Id this node announces to its peers
    fn id(&self) -> &NodeId;

    /// Current declared options
    fn options(&self) -> NodeOptions;

    /// Replace the declared options and push them to connected servers
    async fn set_options(&self, options: NodeOptions) -> Result<()>;

    /// Start accepting clients. Returns the effective bound address.
    async fn bind(&self, address: &str) -> Result<String>;

    /// Open a link to a server. Connecting twice to one address returns the
    /// existing link.
    async fn connect(&self, address: &str) -> Result<PeerLink>;

    /// Close the link to a server. Unknown addresses are a no-op.
    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Servers this node is currently linked to
    fn servers(&self) -> Vec<PeerLink>;

    /// Fire-and-forget send
    async fn tick(&self, to: &NodeId, event: &str, data: Value) -> Result<()>;

    /// Send and wait for exactly one reply
    async fn request(
        &self,
        to: &NodeId,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value>;

    /// Say goodbye on every link and stop all background work
    async fn stop(&self) -> Result<()>;
}

// =============================================================================
// Storage Port
// =============================================================================

/// A stored row; storages assign a numeric `_id` on insert
pub type Record = serde_json::Map<String, Value>;

/// Field holding the storage-assigned row id
pub const RECORD_ID_KEY: &str = "_id";

/// Document storage used for peer router sets
#[async_trait]
pub trait Storage: Send + Sync {
    /// Rows whose fields equal every field of `query`
    async fn find(&self, collection: &str, query: &Record) -> Result<Vec<Record>>;

    /// First row matching `query`
    async fn find_one(&self, collection: &str, query: &Record) -> Result<Option<Record>>;

    /// Insert a row and return it with its assigned `_id`
    async fn insert(&self, collection: &str, row: Record) -> Result<Record>;

    /// Replace the row with the same `_id`
    async fn update(&self, collection: &str, row: Record) -> Result<Record>;

    /// Remove the row with the same `_id`. Returns whether a row was removed.
    async fn remove(&self, collection: &str, row: &Record) -> Result<bool>;
}

// =============================================================================
// Latency Port
// =============================================================================

/// Supplies mean outbound request latency per node
pub trait LatencySource: Send + Sync {
    /// Mean latency in milliseconds, `None` when no sample exists
    fn mean_latency_ms(&self, node: &NodeId) -> Option<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = NodeId::generate("router");
        let b = NodeId::generate("router");
        assert!(a.as_str().starts_with("router::"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_responder_delivers_failure_kind() {
        let (responder, rx) = Responder::channel();
        assert!(responder.fail(&Error::NodeNotFound {
            node_id: "x".into()
        }));

        let reply = rx.await.unwrap();
        assert_eq!(reply.unwrap_err().kind, ErrorKind::NodeNotFound);
    }

    #[tokio::test]
    async fn test_responder_without_waiter() {
        let (responder, rx) = Responder::channel();
        drop(rx);
        assert!(!responder.reply(Value::Null));
    }
}
