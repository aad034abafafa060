//! In-Memory Storage
//!
//! Process-local storage; contents are lost when the process exits.

use super::collections::Collections;
use crate::domain::ports::{Record, Storage};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Collections>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find(&self, collection: &str, query: &Record) -> Result<Vec<Record>> {
        self.inner.read().find(collection, query)
    }

    async fn find_one(&self, collection: &str, query: &Record) -> Result<Option<Record>> {
        self.inner.read().find_one(collection, query)
    }

    async fn insert(&self, collection: &str, row: Record) -> Result<Record> {
        self.inner.write().insert(collection, row)
    }

    async fn update(&self, collection: &str, row: Record) -> Result<Record> {
        self.inner.write().update(collection, row)
    }

    async fn remove(&self, collection: &str, row: &Record) -> Result<bool> {
        self.inner.write().remove(collection, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::ROUTERS_COLLECTION;
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_crud() {
        let storage = MemoryStorage::new();
        let a = storage
            .insert(ROUTERS_COLLECTION, record(json!({"address": "a", "networkId": "n"})))
            .await
            .unwrap();
        let b = storage
            .insert(ROUTERS_COLLECTION, record(json!({"address": "b", "networkId": "n"})))
            .await
            .unwrap();
        assert_ne!(a["_id"], b["_id"]);

        let found = storage
            .find(ROUTERS_COLLECTION, &record(json!({"networkId": "n"})))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let mut changed = a.clone();
        changed.insert("address".into(), json!("c"));
        storage.update(ROUTERS_COLLECTION, changed).await.unwrap();
        let one = storage
            .find_one(ROUTERS_COLLECTION, &record(json!({"address": "c"})))
            .await
            .unwrap();
        assert_eq!(one.unwrap()["_id"], a["_id"]);

        assert!(storage.remove(ROUTERS_COLLECTION, &a).await.unwrap());
        assert!(!storage.remove(ROUTERS_COLLECTION, &a).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let storage = MemoryStorage::new();
        assert_matches!(
            storage.find("services", &Record::new()).await,
            Err(Error::Storage(_))
        );
        assert_matches!(
            storage.insert("services", Record::new()).await,
            Err(Error::Storage(_))
        );
    }
}
