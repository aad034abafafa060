//! Error types for the mesh router
//!
//! Provides a closed set of error kinds shared by the router, the network
//! service and the transport. Errors that travel over the wire are reduced to
//! a [`RemoteError`] and rebuilt on the requesting side with their kind intact.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the mesh
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("No online node matches filter {filter}")]
    NoOnlineNode { filter: String },

    #[error("There is no router available for service '{service_id}'")]
    NoOnlineRouter { service_id: String },

    #[error("Request '{event}' timeout after {timeout_ms} ms")]
    Timeout { event: String, timeout_ms: u64 },

    // =========================================================================
    // Argument Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Service {id} already started")]
    AlreadyStarted { id: String },

    #[error("Service {id} is not started: {reason}")]
    NotStarted { id: String, reason: String },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error("Remote {kind} error: {message}")]
    Remote { kind: ErrorKind, message: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Conversion Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closed taxonomy of error kinds, stable across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NodeNotFound,
    NoOnlineNode,
    NoOnlineRouter,
    Timeout,
    InvalidArgument,
    AlreadyStarted,
    NotStarted,
    Transport,
    Storage,
    Configuration,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NodeNotFound => "NODE_NOT_FOUND",
            ErrorKind::NoOnlineNode => "NO_ONLINE_NODE",
            ErrorKind::NoOnlineRouter => "NO_ONLINE_ROUTER",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::AlreadyStarted => "ALREADY_STARTED",
            ErrorKind::NotStarted => "NOT_STARTED",
            ErrorKind::Transport => "TRANSPORT",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

/// Error reduced to its wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for RemoteError {
    fn from(error: &Error) -> Self {
        let message = match error {
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: error.kind(),
            message,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(remote: RemoteError) -> Self {
        Error::Remote {
            kind: remote.kind,
            message: remote.message,
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NodeNotFound { .. } => ErrorKind::NodeNotFound,
            Error::NoOnlineNode { .. } => ErrorKind::NoOnlineNode,
            Error::NoOnlineRouter { .. } => ErrorKind::NoOnlineRouter,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::InvalidArgument(_) | Error::InvalidFilter(_) => ErrorKind::InvalidArgument,
            Error::AlreadyStarted { .. } => ErrorKind::AlreadyStarted,
            Error::NotStarted { .. } => ErrorKind::NotStarted,
            Error::Remote { kind, .. } => *kind,
            Error::Transport(_) | Error::Io(_) => ErrorKind::Transport,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Configuration(_) | Error::Yaml(_) => ErrorKind::Configuration,
            Error::Internal(_) | Error::Json(_) | Error::Metrics(_) => ErrorKind::Internal,
        }
    }

    /// Check if retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout
                | ErrorKind::Transport
                | ErrorKind::NoOnlineNode
                | ErrorKind::NoOnlineRouter
        )
    }
}

/// Result type alias for the mesh
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::NodeNotFound {
            node_id: "node-1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NodeNotFound);
        assert!(!err.is_transient());

        let err = Error::InvalidFilter("bad".into());
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = Error::Timeout {
            event: "foo".into(),
            timeout_ms: 500,
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_remote_error_keeps_kind() {
        let original = Error::NoOnlineNode {
            filter: "{serviceName: foo}".into(),
        };
        let remote = RemoteError::from(&original);
        assert_eq!(remote.kind, ErrorKind::NoOnlineNode);

        let rebuilt = Error::from(remote.clone());
        assert_eq!(rebuilt.kind(), ErrorKind::NoOnlineNode);

        // Relaying a remote error does not nest its message
        assert_eq!(RemoteError::from(&rebuilt), remote);
    }

    #[test]
    fn test_error_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::NoOnlineRouter).unwrap();
        assert_eq!(json, "\"NO_ONLINE_ROUTER\"");
        assert_eq!(ErrorKind::NodeNotFound.to_string(), "NODE_NOT_FOUND");
    }
}
