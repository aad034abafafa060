//! Collection Set
//!
//! The document model shared by the bundled storages: named collections of
//! JSON rows with a numeric `_id` assigned on insert.

use crate::domain::ports::{Record, RECORD_ID_KEY};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Peer router sets
pub const ROUTERS_COLLECTION: &str = "routers";

/// Network descriptions
pub const NETWORKS_COLLECTION: &str = "networks";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collections {
    next_id: u64,
    collections: HashMap<String, Vec<Record>>,
}

impl Default for Collections {
    fn default() -> Self {
        let mut collections = HashMap::new();
        collections.insert(ROUTERS_COLLECTION.to_string(), Vec::new());
        collections.insert(NETWORKS_COLLECTION.to_string(), Vec::new());
        Self {
            next_id: 1,
            collections,
        }
    }
}

impl Collections {
    fn rows(&self, collection: &str) -> Result<&Vec<Record>> {
        self.collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))
    }

    fn rows_mut(&mut self, collection: &str) -> Result<&mut Vec<Record>> {
        self.collections
            .get_mut(collection)
            .ok_or_else(|| unknown_collection(collection))
    }

    pub fn find(&self, collection: &str, query: &Record) -> Result<Vec<Record>> {
        Ok(self
            .rows(collection)?
            .iter()
            .filter(|row| matches_query(row, query))
            .cloned()
            .collect())
    }

    pub fn find_one(&self, collection: &str, query: &Record) -> Result<Option<Record>> {
        Ok(self
            .rows(collection)?
            .iter()
            .find(|row| matches_query(row, query))
            .cloned())
    }

    pub fn insert(&mut self, collection: &str, mut row: Record) -> Result<Record> {
        let id = self.next_id;
        let rows = self.rows_mut(collection)?;
        row.insert(RECORD_ID_KEY.to_string(), Value::from(id));
        rows.push(row.clone());
        self.next_id += 1;
        Ok(row)
    }

    pub fn update(&mut self, collection: &str, row: Record) -> Result<Record> {
        let id = record_id(&row)?;
        let slot = self
            .rows_mut(collection)?
            .iter_mut()
            .find(|existing| existing.get(RECORD_ID_KEY) == Some(&id))
            .ok_or_else(|| {
                Error::Storage(format!("no row {} in collection '{}'", id, collection))
            })?;
        *slot = row.clone();
        Ok(row)
    }

    pub fn remove(&mut self, collection: &str, row: &Record) -> Result<bool> {
        let id = record_id(row)?;
        let rows = self.rows_mut(collection)?;
        let before = rows.len();
        rows.retain(|existing| existing.get(RECORD_ID_KEY) != Some(&id));
        Ok(rows.len() != before)
    }
}

fn matches_query(row: &Record, query: &Record) -> bool {
    query.iter().all(|(key, value)| row.get(key) == Some(value))
}

fn record_id(row: &Record) -> Result<Value> {
    row.get(RECORD_ID_KEY)
        .cloned()
        .ok_or_else(|| Error::Storage("row has no _id".into()))
}

fn unknown_collection(collection: &str) -> Error {
    Error::Storage(format!("unknown collection '{}'", collection))
}
