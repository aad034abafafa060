//! File Storage
//!
//! Same document model as [`MemoryStorage`](super::MemoryStorage), persisted
//! as one JSON document rewritten after every mutation. A mutation applies
//! to a copy of the collections, which replaces the live set only once the
//! document has been written.

use super::collections::Collections;
use crate::domain::ports::{Record, Storage};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    inner: Mutex<Collections>,
}

impl FileStorage {
    /// Open the document at `path`, starting empty when it does not exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Opened file storage");
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, collections: &Collections) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(collections)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn find(&self, collection: &str, query: &Record) -> Result<Vec<Record>> {
        self.inner.lock().await.find(collection, query)
    }

    async fn find_one(&self, collection: &str, query: &Record) -> Result<Option<Record>> {
        self.inner.lock().await.find_one(collection, query)
    }

    async fn insert(&self, collection: &str, row: Record) -> Result<Record> {
        let mut inner = self.inner.lock().await;
        let mut next = inner.clone();
        let row = next.insert(collection, row)?;
        self.persist(&next).await?;
        *inner = next;
        Ok(row)
    }

    async fn update(&self, collection: &str, row: Record) -> Result<Record> {
        let mut inner = self.inner.lock().await;
        let mut next = inner.clone();
        let row = next.update(collection, row)?;
        self.persist(&next).await?;
        *inner = next;
        Ok(row)
    }

    async fn remove(&self, collection: &str, row: &Record) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let mut next = inner.clone();
        let removed = next.remove(collection, row)?;
        if removed {
            self.persist(&next).await?;
            *inner = next;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ROUTERS_COLLECTION;
    use serde_json::json;

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.json");

        let storage = FileStorage::open(&path).await.unwrap();
        let row = json!({"address": "127.0.0.1:9000", "networkId": "n"});
        let inserted = storage
            .insert(ROUTERS_COLLECTION, row.as_object().cloned().unwrap())
            .await
            .unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).await.unwrap();
        let rows = reopened.find(ROUTERS_COLLECTION, &Record::new()).await.unwrap();
        assert_eq!(rows, vec![inserted.clone()]);

        // Ids keep increasing across reopen
        let next = reopened
            .insert(ROUTERS_COLLECTION, Record::new())
            .await
            .unwrap();
        assert_ne!(next["_id"], inserted["_id"]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_rows_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.json");
        let storage = FileStorage::open(&path).await.unwrap();

        // A directory in place of the document makes the rename fail
        std::fs::create_dir(&path).unwrap();
        let row = json!({"address": "127.0.0.1:9000"});
        assert!(storage
            .insert(ROUTERS_COLLECTION, row.as_object().cloned().unwrap())
            .await
            .is_err());
        assert!(storage
            .find(ROUTERS_COLLECTION, &Record::new())
            .await
            .unwrap()
            .is_empty());

        std::fs::remove_dir(&path).unwrap();
        let inserted = storage
            .insert(ROUTERS_COLLECTION, row.as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(inserted["_id"], json!(1));
        let rows = storage.find(ROUTERS_COLLECTION, &Record::new()).await.unwrap();
        assert_eq!(rows, vec![inserted]);
    }
}
