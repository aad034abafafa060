//! Peer Router Set
//!
//! Typed view over the `routers` collection: the router addresses a network
//! service knows, keyed by the owning network id.

use super::collections::ROUTERS_COLLECTION;
use crate::domain::ports::{NodeId, Record, Storage, RECORD_ID_KEY};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One stored router address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(rename = "_id")]
    pub id: u64,
    pub address: String,
    #[serde(rename = "networkId")]
    pub network_id: String,
}

impl PeerRecord {
    fn from_row(row: Record) -> Result<Self> {
        serde_json::from_value(Value::Object(row))
            .map_err(|e| Error::Storage(format!("malformed router row: {}", e)))
    }

    fn to_row(&self) -> Record {
        let mut row = Record::new();
        row.insert(RECORD_ID_KEY.to_string(), Value::from(self.id));
        row.insert("address".into(), Value::from(self.address.clone()));
        row.insert("networkId".into(), Value::from(self.network_id.clone()));
        row
    }
}

/// Router addresses owned by one network service
pub struct PeerRouterSet {
    storage: Arc<dyn Storage>,
    owner: NodeId,
    // Serializes check-then-insert so an address is stored once
    lock: Mutex<()>,
}

impl std::fmt::Debug for PeerRouterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRouterSet")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl PeerRouterSet {
    pub fn new(storage: Arc<dyn Storage>, owner: NodeId) -> Self {
        Self {
            storage,
            owner,
            lock: Mutex::new(()),
        }
    }

    fn query(&self, address: Option<&str>) -> Record {
        let mut query = Record::new();
        query.insert("networkId".into(), Value::from(self.owner.as_str()));
        if let Some(address) = address {
            query.insert("address".into(), Value::from(address));
        }
        query
    }

    /// Store `address`; an already stored address returns its existing row
    pub async fn add(&self, address: &str) -> Result<PeerRecord> {
        let _guard = self.lock.lock().await;
        if let Some(row) = self
            .storage
            .find_one(ROUTERS_COLLECTION, &self.query(Some(address)))
            .await?
        {
            return PeerRecord::from_row(row);
        }
        let row = self
            .storage
            .insert(ROUTERS_COLLECTION, self.query(Some(address)))
            .await?;
        PeerRecord::from_row(row)
    }

    /// Forget `address`, returning the removed row
    pub async fn remove(&self, address: &str) -> Result<Option<PeerRecord>> {
        let _guard = self.lock.lock().await;
        let Some(record) = self.find(address).await? else {
            return Ok(None);
        };
        self.storage
            .remove(ROUTERS_COLLECTION, &record.to_row())
            .await?;
        Ok(Some(record))
    }

    pub async fn find(&self, address: &str) -> Result<Option<PeerRecord>> {
        self.storage
            .find_one(ROUTERS_COLLECTION, &self.query(Some(address)))
            .await?
            .map(PeerRecord::from_row)
            .transpose()
    }

    pub async fn list(&self) -> Result<Vec<PeerRecord>> {
        self.storage
            .find(ROUTERS_COLLECTION, &self.query(None))
            .await?
            .into_iter()
            .map(PeerRecord::from_row)
            .collect()
    }

    pub async fn addresses(&self) -> Result<Vec<String>> {
        Ok(self.list().await?.into_iter().map(|r| r.address).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let peers = PeerRouterSet::new(storage, NodeId::new("net-1"));

        let first = peers.add("127.0.0.1:9000").await.unwrap();
        let second = peers.add("127.0.0.1:9000").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(peers.addresses().await.unwrap(), vec!["127.0.0.1:9000"]);
    }

    #[tokio::test]
    async fn test_sets_are_per_owner() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let a = PeerRouterSet::new(storage.clone(), NodeId::new("a"));
        let b = PeerRouterSet::new(storage, NodeId::new("b"));

        a.add("r1").await.unwrap();
        b.add("r1").await.unwrap();
        b.add("r2").await.unwrap();

        assert_eq!(a.list().await.unwrap().len(), 1);
        assert_eq!(b.list().await.unwrap().len(), 2);

        assert!(b.remove("r1").await.unwrap().is_some());
        assert!(b.remove("r1").await.unwrap().is_none());
        assert_eq!(a.addresses().await.unwrap(), vec!["r1"]);
    }

    #[tokio::test]
    async fn test_concurrent_adds_store_once() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let peers = Arc::new(PeerRouterSet::new(storage, NodeId::new("n")));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let peers = peers.clone();
                tokio::spawn(async move { peers.add("r").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(peers.list().await.unwrap().len(), 1);
    }
}
