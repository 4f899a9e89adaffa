//! Durable document storage for the NTN bridge.
//!
//! The bridge keeps its live state in memory and mirrors it into a document store so
//! a restarted instance can refill its caches. The store is a collaborator, not a
//! ledger: callers treat every write as best effort. This crate provides the
//! [`DocumentStore`] contract and two backends (in-memory and file-based).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// A stored document: a JSON object
pub type Document = Map<String, Value>;

/// Well-known collection names
pub mod collections {
    /// Mesh node records
    pub const MESH_NODES: &str = "mesh_nodes";
    /// Bridge gateway records
    pub const BRIDGE_GATEWAYS: &str = "bridge_gateways";
    /// Completed failover events
    pub const FAILOVER_EVENTS: &str = "uav_failover_events";
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Equality filter over top-level document fields
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    fields: BTreeMap<String, Value>,
}

impl Filter {
    /// Filter that matches every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter on a single field
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    /// Add another equality condition
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Whether a document satisfies every condition
    pub fn matches(&self, doc: &Document) -> bool {
        self.fields
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }

    /// Seed document for an upsert: the filter's own fields
    pub fn to_document(&self) -> Document {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Merge `update` into `target`, replacing top-level keys
pub fn merge_document(target: &mut Document, update: Document) {
    for (key, value) in update {
        target.insert(key, value);
    }
}

/// Document store contract used for durability
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document matching the filter
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError>;

    /// All documents matching the filter, in insertion order
    async fn find_many(&self, collection: &str, filter: &Filter)
        -> Result<Vec<Document>, StorageError>;

    /// Append a document
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StorageError>;

    /// Merge `update` into the first match; insert when `upsert` is set and nothing
    /// matched. Returns whether a document was written.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: Document,
        upsert: bool,
    ) -> Result<bool, StorageError>;

    /// Remove the first match. Returns whether a document was removed.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StorageError>;
}

/// Storage backend configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// One JSON file per collection
    File {
        /// Data directory path
        data_dir: PathBuf,
    },
}

// Re-export backend implementations
pub use backend::file::FileStore;
pub use backend::mem::MemoryStore;

/// Open a document store from configuration
pub async fn open_store(mode: StorageMode) -> Result<Arc<dyn DocumentStore>, StorageError> {
    match mode {
        StorageMode::InMemory => Ok(Arc::new(MemoryStore::new())),
        StorageMode::File { data_dir } => Ok(Arc::new(FileStore::new(data_dir).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_filter_matches() {
        let d = doc(json!({"id": "n1", "status": "active", "hops": 2}));
        assert!(Filter::all().matches(&d));
        assert!(Filter::eq("id", "n1").matches(&d));
        assert!(Filter::eq("id", "n1").and("hops", 2).matches(&d));
        assert!(!Filter::eq("id", "n1").and("status", "failed").matches(&d));
        assert!(!Filter::eq("missing", "x").matches(&d));
    }

    #[test]
    fn test_merge_document_replaces_top_level() {
        let mut target = doc(json!({"id": "g1", "status": "connected", "metrics": {"a": 1}}));
        merge_document(&mut target, doc(json!({"status": "failed", "metrics": {"b": 2}})));
        assert_eq!(
            Value::Object(target),
            json!({"id": "g1", "status": "failed", "metrics": {"b": 2}})
        );
    }

    #[tokio::test]
    async fn test_open_store_in_memory() {
        let store = open_store(StorageMode::InMemory).await.unwrap();
        store
            .insert_one(collections::MESH_NODES, doc(json!({"id": "n1"})))
            .await
            .unwrap();
        assert!(store
            .find_one(collections::MESH_NODES, &Filter::eq("id", "n1"))
            .await
            .unwrap()
            .is_some());
    }
}
