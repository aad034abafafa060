//! Configuration
//!
//! Router and network service settings. Both load from YAML files and fall
//! back to defaults for every omitted field.

use crate::balancer::StrategyDefinition;
use crate::domain::ports::{NodeId, NodeOptions, SERVICE_NAME_KEY};
use crate::error::{Error, Result};
use crate::transport::NodeConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default bound on routed requests
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default bound on connects and handshakes
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default window for restoring a failed router link
pub const DEFAULT_RECONNECTION_TIMEOUT_MS: u64 = 30_000;

fn default_bind() -> String {
    "0.0.0.0:7500".to_string()
}

fn default_network_name() -> String {
    "network".to_string()
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_yaml::from_str(&text)?)
}

// =============================================================================
// Router Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Router id; generated when absent
    pub id: Option<String>,
    /// Listen address for service nodes
    pub bind: String,
    /// Address of a router of an existing network to announce ourselves to
    pub join: Option<String>,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Prometheus exposition address; disabled when absent
    pub metrics_addr: Option<String>,
    /// Options the router declares to its own peers
    pub options: NodeOptions,
    pub strategies: Vec<StrategyDefinition>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id: None,
            bind: default_bind(),
            join: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            metrics_addr: None,
            options: NodeOptions::new(),
            strategies: Vec::new(),
        }
    }
}

impl RouterConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        load_yaml(path.as_ref())
    }

    pub fn node_id(&self) -> NodeId {
        match &self.id {
            Some(id) => NodeId::new(id.clone()),
            None => NodeId::generate("router"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..NodeConfig::default()
        }
    }
}

// =============================================================================
// Network Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Service id; generated when absent
    pub id: Option<String>,
    pub name: String,
    /// Seed routers used when none are stored for this id
    pub routers: Vec<String>,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnection_timeout_ms: u64,
    /// Declared options; `serviceName` defaults to `name`
    pub options: NodeOptions,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: default_network_name(),
            routers: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnection_timeout_ms: DEFAULT_RECONNECTION_TIMEOUT_MS,
            options: NodeOptions::new(),
        }
    }
}

impl NetworkConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        load_yaml(path.as_ref())
    }

    pub fn node_id(&self) -> NodeId {
        match &self.id {
            Some(id) => NodeId::new(id.clone()),
            None => NodeId::generate(&self.name),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnection_timeout: Duration::from_millis(self.reconnection_timeout_ms),
            ..NodeConfig::default()
        }
    }

    /// Options announced to routers. An explicit `serviceName` wins over `name`.
    pub fn declared_options(&self) -> NodeOptions {
        let mut options = self.options.clone();
        declare_service_name(&mut options, &self.name);
        options
    }
}

/// Set `serviceName` to `name` unless one is already declared.
/// Returns whether the options changed.
pub fn declare_service_name(options: &mut NodeOptions, name: &str) -> bool {
    if options.contains_key(SERVICE_NAME_KEY) {
        return false;
    }
    options.insert(SERVICE_NAME_KEY.to_string(), name.into());
    true
}
