//! File-backed storage: one JSON document per namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{StorageBackend, StorageEntry};
use crate::error::{PluginError, PluginResult};

type Document = BTreeMap<String, StorageEntry>;

/// Stores each namespace as `<root>/<namespace>.json`.
#[derive(Debug)]
pub struct FileStorageBackend {
    root: PathBuf,
    /// Serialises read-modify-write cycles per namespace.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileStorageBackend {
    /// Creates the backend, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> PluginResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            PluginError::storage(
                "*",
                format!("failed to create storage root {}: {e}", root.display()),
            )
        })?;
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    fn path(&self, namespace: &str) -> PluginResult<PathBuf> {
        let safe = !namespace.is_empty()
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !namespace.starts_with('.');
        if !safe {
            return Err(PluginError::storage(namespace, "namespace is not a safe file name"));
        }
        Ok(self.root.join(format!("{namespace}.json")))
    }

    fn lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(namespace.to_string()).or_default().value())
    }

    async fn load(&self, namespace: &str) -> PluginResult<Document> {
        let path = self.path(namespace)?;
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PluginError::storage(namespace, format!("corrupt document {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(PluginError::storage(
                namespace,
                format!("failed to read {}: {e}", path.display()),
            )),
        }
    }

    async fn save(&self, namespace: &str, doc: &Document) -> PluginResult<()> {
        let path = self.path(namespace)?;
        if doc.is_empty() {
            return match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(PluginError::storage(namespace, format!("failed to remove: {e}"))),
            };
        }
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| PluginError::storage(namespace, format!("encode failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PluginError::storage(namespace, format!("failed to write: {e}")))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| PluginError::storage(namespace, format!("failed to replace: {e}")))?;
        debug!(namespace, keys = doc.len(), bytes = bytes.len(), "Wrote storage document");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorageBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, namespace: &str, key: &str) -> PluginResult<Option<StorageEntry>> {
        let lock = self.lock(namespace);
        let _guard = lock.lock().await;
        Ok(self.load(namespace).await?.remove(key))
    }

    async fn set(&self, namespace: &str, key: &str, value: serde_json::Value) -> PluginResult<()> {
        let lock = self.lock(namespace);
        let _guard = lock.lock().await;
        let mut doc = self.load(namespace).await?;
        match doc.get_mut(key) {
            Some(entry) => entry.update(value),
            None => {
                doc.insert(key.to_string(), StorageEntry::new(value));
            }
        }
        self.save(namespace, &doc).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> PluginResult<bool> {
        let lock = self.lock(namespace);
        let _guard = lock.lock().await;
        let mut doc = self.load(namespace).await?;
        let existed = doc.remove(key).is_some();
        if existed {
            self.save(namespace, &doc).await?;
        }
        Ok(existed)
    }

    async fn list(&self, namespace: &str) -> PluginResult<Vec<String>> {
        let lock = self.lock(namespace);
        let _guard = lock.lock().await;
        Ok(self.load(namespace).await?.into_keys().collect())
    }

    async fn clear(&self, namespace: &str) -> PluginResult<usize> {
        let lock = self.lock(namespace);
        let _guard = lock.lock().await;
        let count = self.load(namespace).await?.len();
        self.save(namespace, &Document::new()).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_survives_a_new_backend_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = FileStorageBackend::new(dir.path()).await.expect("backend");
        first.set("audit", "count", json!(7)).await.expect("set");
        first.set("audit", "last", json!("/files")).await.expect("set");
        first.set("other", "x", json!(true)).await.expect("set");

        let second = FileStorageBackend::new(dir.path()).await.expect("backend");
        assert_eq!(
            second.get("audit", "count").await.expect("get").map(|e| e.value),
            Some(json!(7))
        );
        assert_eq!(
            second.list("audit").await.expect("list"),
            vec!["count".to_string(), "last".to_string()]
        );
        assert_eq!(second.clear("audit").await.expect("clear"), 2);
        assert!(second.list("audit").await.expect("list").is_empty());
        assert!(second.delete("other", "x").await.expect("delete"));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileStorageBackend::new(dir.path()).await.expect("backend");
        assert!(backend.set("../escape", "k", json!(1)).await.is_err());
    }
}
