//! File-based storage backend: one JSON array file per collection

use crate::{merge_document, Document, DocumentStore, Filter, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File-backed document store
///
/// Each collection lives in `<data_dir>/<collection>.json`. Collections are loaded
/// lazily into a cache and rewritten whole on every mutation through a temporary
/// file and a rename, so a crash never leaves a half-written collection behind.
pub struct FileStore {
    data_dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<Document>>>,
}

impl FileStore {
    /// Create a file store rooted at `data_dir`, creating the directory if needed
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        info!("File store opened at {}", data_dir.display());

        Ok(Self {
            data_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Data directory backing this store
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf, StorageError> {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StorageError::Invalid(format!(
                "invalid collection name '{}'",
                collection
            )));
        }
        Ok(self.data_dir.join(format!("{}.json", collection)))
    }

    async fn read_collection(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        let path = self.collection_path(collection)?;
        match tokio::fs::read(&path).await {
            Ok(content) => serde_json::from_slice(&content).map_err(|e| {
                StorageError::Corruption(format!("{}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_collection(
        &self,
        collection: &str,
        docs: &[Document],
    ) -> Result<(), StorageError> {
        let path = self.collection_path(collection)?;
        let tmp = self
            .data_dir
            .join(format!(".{}.{}.tmp", collection, Uuid::new_v4()));

        let content = serde_json::to_vec_pretty(docs)?;
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!("Failed to move {} into place: {}", tmp.display(), e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Wrote {} documents to {}", docs.len(), path.display());
        Ok(())
    }

    /// Load a collection into the cache if it is not there yet
    async fn ensure_loaded(&self, collection: &str) -> Result<(), StorageError> {
        if self.cache.read().await.contains_key(collection) {
            return Ok(());
        }

        let docs = self.read_collection(collection).await?;
        self.cache
            .write()
            .await
            .entry(collection.to_string())
            .or_insert(docs);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        self.ensure_loaded(collection).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StorageError> {
        self.ensure_loaded(collection).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StorageError> {
        self.ensure_loaded(collection).await?;
        let mut cache = self.cache.write().await;
        let docs = cache.entry(collection.to_string()).or_default();

        let mut updated = docs.clone();
        updated.push(doc);
        self.write_collection(collection, &updated).await?;
        *docs = updated;
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: Document,
        upsert: bool,
    ) -> Result<bool, StorageError> {
        self.ensure_loaded(collection).await?;
        let mut cache = self.cache.write().await;
        let docs = cache.entry(collection.to_string()).or_default();

        let mut updated = docs.clone();
        if let Some(existing) = updated.iter_mut().find(|d| filter.matches(d)) {
            merge_document(existing, update);
        } else if upsert {
            let mut doc = filter.to_document();
            merge_document(&mut doc, update);
            updated.push(doc);
        } else {
            return Ok(false);
        }

        self.write_collection(collection, &updated).await?;
        *docs = updated;
        Ok(true)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StorageError> {
        self.ensure_loaded(collection).await?;
        let mut cache = self.cache.write().await;
        let docs = cache.entry(collection.to_string()).or_default();

        let Some(index) = docs.iter().position(|d| filter.matches(d)) else {
            return Ok(false);
        };

        let mut updated = docs.clone();
        updated.remove(index);
        self.write_collection(collection, &updated).await?;
        *docs = updated;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = FileStore::new(temp_dir.path()).await.unwrap();
            store
                .insert_one("mesh_nodes", doc(json!({"id": "n1", "status": "active"})))
                .await
                .unwrap();
            store
                .update_one(
                    "mesh_nodes",
                    &Filter::eq("id", "n2"),
                    doc(json!({"status": "connecting"})),
                    true,
                )
                .await
                .unwrap();
        }

        assert!(temp_dir.path().join("mesh_nodes.json").exists());

        let store = FileStore::new(temp_dir.path()).await.unwrap();
        let all = store.find_many("mesh_nodes", &Filter::all()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1]["id"], "n2");
        assert_eq!(all[1]["status"], "connecting");
    }

    #[tokio::test]
    async fn test_file_store_delete_and_missing_collection() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).await.unwrap();

        assert!(store
            .find_one("bridge_gateways", &Filter::all())
            .await
            .unwrap()
            .is_none());

        store
            .insert_one("bridge_gateways", doc(json!({"id": "g1"})))
            .await
            .unwrap();
        assert!(store
            .delete_one("bridge_gateways", &Filter::eq("id", "g1"))
            .await
            .unwrap());
        assert!(!store
            .update_one(
                "bridge_gateways",
                &Filter::eq("id", "g1"),
                doc(json!({"status": "failed"})),
                false
            )
            .await
            .unwrap());

        let reopened = FileStore::new(temp_dir.path()).await.unwrap();
        assert!(reopened
            .find_many("bridge_gateways", &Filter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_bad_names_and_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).await.unwrap();

        assert!(matches!(
            store.insert_one("../escape", Document::new()).await,
            Err(StorageError::Invalid(_))
        ));

        std::fs::write(temp_dir.path().join("broken.json"), b"{not json").unwrap();
        assert!(matches!(
            store.find_many("broken", &Filter::all()).await,
            Err(StorageError::Corruption(_))
        ));
    }
}
