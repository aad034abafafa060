//! Node Registry
//!
//! Tracks the nodes connected to a router together with their declared
//! options. A single reader/writer lock guards the map; it is held only to
//! mutate or clone entries, so predicates supplied by callers never run
//! under it.

use crate::domain::ports::{NodeId, NodeOptions, SERVICE_NAME_KEY, VERSION_KEY};
use crate::error::{Error, Result};
use crate::filter::Predicate;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::RegistryEvent;

/// Capacity of the registry event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Node Entry
// =============================================================================

/// Entry for a single connected node
#[derive(Debug, Clone)]
pub struct NodeEntry {
    /// Node ID
    pub id: NodeId,
    /// Remote address of the link
    pub address: String,
    /// Declared options, including the subscription table
    pub options: NodeOptions,
    /// Time of the (latest) handshake
    pub connected_at: DateTime<Utc>,
    /// Last options change
    pub updated_at: DateTime<Utc>,
}

impl NodeEntry {
    pub fn new(id: NodeId, address: String, options: NodeOptions) -> Self {
        let now = Utc::now();
        Self {
            id,
            address,
            options,
            connected_at: now,
            updated_at: now,
        }
    }

    /// Declared service name
    pub fn service_name(&self) -> Option<&str> {
        self.options.get(SERVICE_NAME_KEY).and_then(|v| v.as_str())
    }

    /// Declared version string
    pub fn version(&self) -> Option<&str> {
        self.options.get(VERSION_KEY).and_then(|v| v.as_str())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Nodes currently registered
    pub total_nodes: AtomicU64,
    /// Connect events, reconnections included
    pub connections: AtomicU64,
    /// Removals of a registered node
    pub disconnections: AtomicU64,
    /// Options replacements
    pub option_updates: AtomicU64,
}

impl RegistryStats {
    /// Create a snapshot of current stats
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            total_nodes: self.total_nodes.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            option_updates: self.option_updates.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub total_nodes: u64,
    pub connections: u64,
    pub disconnections: u64,
    pub option_updates: u64,
}

// =============================================================================
// Node Registry
// =============================================================================

/// Registry of connected nodes
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    stats: RegistryStats,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_count", &self.len())
            .finish()
    }
}

impl NodeRegistry {
    /// Create a new node registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Register a node. A known id is replaced by the new entry.
    pub fn add(&self, id: impl Into<NodeId>, address: impl Into<String>, options: NodeOptions) {
        let entry = NodeEntry::new(id.into(), address.into(), options);
        let event = RegistryEvent::NodeConnected {
            node_id: entry.id.to_string(),
            address: entry.address.clone(),
            service_name: entry.service_name().map(str::to_string),
        };

        let replaced = self.nodes.write().insert(entry.id.clone(), entry);
        if replaced.is_none() {
            self.stats.total_nodes.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.connections.fetch_add(1, Ordering::Relaxed);

        let _ = self.event_sender.send(event);
    }

    /// Replace a node's declared options
    pub fn update_options(&self, id: &NodeId, options: NodeOptions) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            let entry = nodes.get_mut(id).ok_or_else(|| Error::NodeNotFound {
                node_id: id.to_string(),
            })?;
            entry.options = options;
            entry.updated_at = Utc::now();
        }
        self.stats.option_updates.fetch_add(1, Ordering::Relaxed);

        let _ = self.event_sender.send(RegistryEvent::NodeOptionsUpdated {
            node_id: id.to_string(),
        });
        Ok(())
    }

    /// Remove a node. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &NodeId) -> Option<NodeEntry> {
        let removed = self.nodes.write().remove(id)?;

        self.stats.total_nodes.fetch_sub(1, Ordering::Relaxed);
        self.stats.disconnections.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_sender.send(RegistryEvent::NodeDisconnected {
            node_id: id.to_string(),
        });
        Some(removed)
    }

    /// Ids of the nodes satisfying `predicate` (all nodes when `None`)
    pub fn list(&self, predicate: Option<&Predicate>) -> Vec<NodeId> {
        self.snapshot(predicate)
            .into_iter()
            .map(|entry| entry.id)
            .collect()
    }

    /// Entries satisfying `predicate`, cloned at call start
    pub fn snapshot(&self, predicate: Option<&Predicate>) -> Vec<NodeEntry> {
        let mut entries: Vec<NodeEntry> = self.nodes.read().values().cloned().collect();
        // Stable candidate order for tie-breaking
        entries.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then_with(|| a.id.cmp(&b.id)));

        match predicate {
            Some(predicate) => entries
                .into_iter()
                .filter(|entry| predicate(&entry.options))
                .collect(),
            None => entries,
        }
    }

    /// Get a node by ID
    pub fn get(&self, id: &NodeId) -> Option<NodeEntry> {
        self.nodes.read().get(id).cloned()
    }

    /// Check if a node exists
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(HashMap::new()),
            stats: RegistryStats::default(),
            event_sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{compile, Filter, FilterSpec, Operator};
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    fn options(value: Value) -> NodeOptions {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_add_and_get() {
        let registry = NodeRegistry::new();
        registry.add("node-001", "127.0.0.1:4000", options(json!({"serviceName": "foo"})));

        let entry = registry.get(&NodeId::new("node-001")).unwrap();
        assert_eq!(entry.address, "127.0.0.1:4000");
        assert_eq!(entry.service_name(), Some("foo"));

        let stats = registry.stats();
        assert_eq!(stats.total_nodes, 1);
        assert_eq!(stats.connections, 1);
    }

    #[test]
    fn test_registry_add_replaces_entry() {
        let registry = NodeRegistry::new();
        registry.add("node-001", "a", options(json!({"version": "1.0.0"})));
        registry.add("node-001", "b", options(json!({"version": "2.0.0"})));

        assert_eq!(registry.len(), 1);
        let entry = registry.get(&NodeId::new("node-001")).unwrap();
        assert_eq!(entry.address, "b");
        assert_eq!(entry.version(), Some("2.0.0"));
        assert_eq!(registry.stats().total_nodes, 1);
    }

    #[test]
    fn test_registry_remove_is_idempotent() {
        let registry = NodeRegistry::new();
        let id = NodeId::new("node-001");
        registry.add(id.clone(), "a", NodeOptions::new());

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(!registry.contains(&id));

        let stats = registry.stats();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.disconnections, 1);
    }

    #[test]
    fn test_update_unknown_node() {
        let registry = NodeRegistry::new();
        let result = registry.update_options(&NodeId::new("ghost"), NodeOptions::new());
        assert_matches!(result, Err(Error::NodeNotFound { .. }));
    }

    #[test]
    fn test_list_with_filter() {
        let registry = NodeRegistry::new();
        registry.add("a", "a", options(json!({"serviceName": "foo", "load": 1})));
        registry.add("b", "b", options(json!({"serviceName": "foo", "load": 9})));
        registry.add("c", "c", options(json!({"serviceName": "bar", "load": 1})));
        registry.add("d", "d", options(json!({"load": 1})));

        let filter: Filter = FilterSpec::new()
            .field("serviceName", "foo")
            .field("load", Operator::Lt(json!(5)))
            .into();
        let mut ids = registry.list(Some(&compile(&filter)));
        ids.sort();

        // "d" declares no serviceName, so that field does not exclude it
        assert_eq!(ids, vec![NodeId::new("a"), NodeId::new("d")]);
        assert_eq!(registry.list(None).len(), 4);
    }

    #[test]
    fn test_predicate_runs_outside_the_lock() {
        let registry = NodeRegistry::new();
        registry.add("a", "a", NodeOptions::new());

        let inner = registry.clone();
        let filter = Filter::predicate(move |_| inner.len() == 1);
        assert_eq!(registry.list(Some(&compile(&filter))).len(), 1);
    }

    #[tokio::test]
    async fn test_registry_events() {
        let registry = NodeRegistry::new();
        let mut events = registry.subscribe();
        let id = NodeId::new("a");

        registry.add(id.clone(), "addr", options(json!({"serviceName": "foo"})));
        registry.update_options(&id, NodeOptions::new()).unwrap();
        registry.remove(&id);

        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::NodeConnected {
                node_id: "a".into(),
                address: "addr".into(),
                service_name: Some("foo".into()),
            }
        );
        assert_matches!(events.recv().await.unwrap(), RegistryEvent::NodeOptionsUpdated { .. });
        assert_matches!(events.recv().await.unwrap(), RegistryEvent::NodeDisconnected { .. });
    }
}
