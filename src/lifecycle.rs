//! Service Lifecycle
//!
//! Routers and network services share the `INIT -> ONLINE -> OFFLINE`
//! lifecycle. OFFLINE is terminal.

use crate::domain::ports::{NodeId, NodeOptions};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Init,
    Online,
    Offline,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Init => write!(f, "init"),
            ServiceStatus::Online => write!(f, "online"),
            ServiceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Status plus transition timestamps
#[derive(Debug, Clone)]
pub struct Lifecycle {
    status: ServiceStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            status: ServiceStatus::Init,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn is_online(&self) -> bool {
        self.status == ServiceStatus::Online
    }

    /// Only an INIT service may start
    pub fn begin_start(&self, id: &NodeId) -> Result<()> {
        match self.status {
            ServiceStatus::Init => Ok(()),
            _ => Err(Error::AlreadyStarted { id: id.to_string() }),
        }
    }

    pub fn mark_online(&mut self) {
        self.status = ServiceStatus::Online;
        self.started_at = Some(Utc::now());
    }

    /// Move to OFFLINE. Returns false when the service was not online.
    pub fn mark_offline(&mut self) -> bool {
        if self.status != ServiceStatus::Online {
            return false;
        }
        self.status = ServiceStatus::Offline;
        self.stopped_at = Some(Utc::now());
        true
    }

    pub fn require_online(&self, id: &NodeId, reason: &str) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(Error::NotStarted {
                id: id.to_string(),
                reason: reason.to_string(),
            })
        }
    }

    pub fn info(&self, id: &NodeId, name: &str, options: NodeOptions) -> ServiceInfo {
        ServiceInfo {
            id: id.clone(),
            name: name.to_string(),
            options,
            status: self.status,
            created: self.created_at,
            started: self.started_at,
            stopped: self.stopped_at,
        }
    }
}

/// Serializable snapshot of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: NodeId,
    pub name: String,
    pub options: NodeOptions,
    pub status: ServiceStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_transitions() {
        let id = NodeId::new("svc");
        let mut lifecycle = Lifecycle::new();
        assert_matches!(lifecycle.require_online(&id, "tick"), Err(Error::NotStarted { .. }));
        assert!(!lifecycle.mark_offline());

        lifecycle.begin_start(&id).unwrap();
        lifecycle.mark_online();
        assert!(lifecycle.require_online(&id, "tick").is_ok());
        assert_matches!(lifecycle.begin_start(&id), Err(Error::AlreadyStarted { .. }));

        assert!(lifecycle.mark_offline());
        assert!(!lifecycle.mark_offline());
        assert_matches!(lifecycle.begin_start(&id), Err(Error::AlreadyStarted { .. }));
        assert_eq!(lifecycle.status(), ServiceStatus::Offline);
    }

    #[test]
    fn test_info_serializes_timestamps() {
        let id = NodeId::new("svc");
        let mut lifecycle = Lifecycle::new();
        lifecycle.mark_online();

        let info = serde_json::to_value(lifecycle.info(&id, "router", NodeOptions::new())).unwrap();
        assert_eq!(info["status"], "online");
        assert!(info["started"].is_string());
        assert!(info["stopped"].is_null());
    }
}
