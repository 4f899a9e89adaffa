//! In-memory storage backend for development and testing

use crate::{merge_document, Document, DocumentStore, Filter, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory document store
pub struct MemoryStore {
    /// Per-collection documents in insertion order
    collections: Arc<DashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            collections: Arc::new(DashMap::new()),
        }
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Whether a collection holds no documents
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StorageError> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StorageError> {
        debug!("Store insert collection={}", collection);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: Document,
        upsert: bool,
    ) -> Result<bool, StorageError> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();

        if let Some(existing) = docs.iter_mut().find(|d| filter.matches(d)) {
            merge_document(existing, update);
            debug!("Store update collection={} matched", collection);
            return Ok(true);
        }

        if upsert {
            let mut doc = filter.to_document();
            merge_document(&mut doc, update);
            docs.push(doc);
            debug!("Store update collection={} upserted", collection);
            return Ok(true);
        }

        Ok(false)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StorageError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(false);
        };

        match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                docs.remove(index);
                debug!("Store delete collection={}", collection);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();

        store
            .insert_one("nodes", doc(json!({"id": "a", "status": "active"})))
            .await
            .unwrap();
        store
            .insert_one("nodes", doc(json!({"id": "b", "status": "active"})))
            .await
            .unwrap();

        let found = store
            .find_one("nodes", &Filter::eq("id", "b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["id"], "b");

        let active = store
            .find_many("nodes", &Filter::eq("status", "active"))
            .await
            .unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0]["id"], "a");

        assert!(store
            .find_one("other", &Filter::all())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_store_update_and_upsert() {
        let store = MemoryStore::new();
        let filter = Filter::eq("id", "g1");

        // No match and no upsert
        assert!(!store
            .update_one("gw", &filter, doc(json!({"status": "connected"})), false)
            .await
            .unwrap());
        assert!(store.is_empty("gw"));

        // Upsert seeds from the filter
        assert!(store
            .update_one("gw", &filter, doc(json!({"status": "connected"})), true)
            .await
            .unwrap());
        let stored = store.find_one("gw", &filter).await.unwrap().unwrap();
        assert_eq!(stored["id"], "g1");
        assert_eq!(stored["status"], "connected");

        // Merge into the existing document
        store
            .update_one("gw", &filter, doc(json!({"status": "failed"})), true)
            .await
            .unwrap();
        assert_eq!(store.len("gw"), 1);
        let stored = store.find_one("gw", &filter).await.unwrap().unwrap();
        assert_eq!(stored["status"], "failed");
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryStore::new();
        store
            .insert_one("events", doc(json!({"id": "e1"})))
            .await
            .unwrap();

        assert!(store
            .delete_one("events", &Filter::eq("id", "e1"))
            .await
            .unwrap());
        assert!(!store
            .delete_one("events", &Filter::eq("id", "e1"))
            .await
            .unwrap());
        assert!(!store
            .delete_one("missing", &Filter::all())
            .await
            .unwrap());
    }
}
