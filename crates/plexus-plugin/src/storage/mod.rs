//! Per-plugin isolated key/value storage.
//!
//! Backends store entries under `(namespace, key)`. Plugins never see a
//! backend directly: they receive a [`PluginStorage`] whose namespace is fixed
//! to their own name at construction, so no call can reach another plugin's
//! keys.

pub mod file;
pub mod memory;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

pub use file::FileStorageBackend;
pub use memory::MemoryStorageBackend;

/// A stored value with timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// The value.
    pub value: serde_json::Value,
    /// First write.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl StorageEntry {
    /// Creates a fresh entry.
    pub fn new(value: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the value, keeping `created_at`.
    pub fn update(&mut self, value: serde_json::Value) {
        self.value = value;
        self.updated_at = Utc::now();
    }
}

/// Persistence behind plugin storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Reads one entry.
    async fn get(&self, namespace: &str, key: &str) -> PluginResult<Option<StorageEntry>>;

    /// Writes one entry, creating or updating it.
    async fn set(&self, namespace: &str, key: &str, value: serde_json::Value) -> PluginResult<()>;

    /// Deletes one entry; returns whether it existed.
    async fn delete(&self, namespace: &str, key: &str) -> PluginResult<bool>;

    /// Lists keys in `namespace`, sorted.
    async fn list(&self, namespace: &str) -> PluginResult<Vec<String>>;

    /// Removes every entry in `namespace`; returns how many were removed.
    async fn clear(&self, namespace: &str) -> PluginResult<usize>;
}

/// Storage handle scoped to one plugin.
#[derive(Clone)]
pub struct PluginStorage {
    namespace: String,
    backend: Arc<dyn StorageBackend>,
    revoked: Arc<AtomicBool>,
}

impl PluginStorage {
    /// Creates a handle for `namespace`.
    pub fn new(namespace: &str, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            namespace: namespace.to_string(),
            backend,
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The namespace this handle is bound to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Invalidates this handle and all its clones.
    pub(crate) fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    /// Returns whether the handle was revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    fn check(&self, key: Option<&str>) -> PluginResult<()> {
        if self.is_revoked() {
            return Err(PluginError::lifecycle(
                &self.namespace,
                "storage handle used after cleanup",
            ));
        }
        if key.is_some_and(str::is_empty) {
            return Err(PluginError::storage(&self.namespace, "empty key"));
        }
        Ok(())
    }

    /// Reads a value.
    pub async fn get(&self, key: &str) -> PluginResult<Option<serde_json::Value>> {
        Ok(self.get_entry(key).await?.map(|e| e.value))
    }

    /// Reads a value with its timestamps.
    pub async fn get_entry(&self, key: &str) -> PluginResult<Option<StorageEntry>> {
        self.check(Some(key))?;
        self.backend.get(&self.namespace, key).await
    }

    /// Reads and deserializes a value.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> PluginResult<Option<T>> {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| PluginError::storage(&self.namespace, format!("decode '{key}': {e}"))),
            None => Ok(None),
        }
    }

    /// Writes a value.
    pub async fn set(&self, key: &str, value: serde_json::Value) -> PluginResult<()> {
        self.check(Some(key))?;
        self.backend.set(&self.namespace, key, value).await
    }

    /// Serializes and writes a value.
    pub async fn set_as<T: Serialize + Sync>(&self, key: &str, value: &T) -> PluginResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| PluginError::storage(&self.namespace, format!("encode '{key}': {e}")))?;
        self.set(key, value).await
    }

    /// Deletes a key; returns whether it existed.
    pub async fn delete(&self, key: &str) -> PluginResult<bool> {
        self.check(Some(key))?;
        self.backend.delete(&self.namespace, key).await
    }

    /// Lists this plugin's keys.
    pub async fn list(&self) -> PluginResult<Vec<String>> {
        self.check(None)?;
        self.backend.list(&self.namespace).await
    }

    /// Removes all of this plugin's keys.
    pub async fn clear(&self) -> PluginResult<usize> {
        self.check(None)?;
        self.backend.clear(&self.namespace).await
    }
}

impl std::fmt::Debug for PluginStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStorage")
            .field("namespace", &self.namespace)
            .field("backend", &self.backend.name())
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> Arc<dyn StorageBackend> {
        Arc::new(MemoryStorageBackend::new())
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let shared = backend();
        let a = PluginStorage::new("a", Arc::clone(&shared));
        let b = PluginStorage::new("b", Arc::clone(&shared));

        a.set("secret", json!("a-only")).await.expect("set");
        b.set("other", json!(1)).await.expect("set");

        assert_eq!(b.get("secret").await.expect("get"), None);
        assert_eq!(b.list().await.expect("list"), vec!["other".to_string()]);
        assert_eq!(a.list().await.expect("list"), vec!["secret".to_string()]);
        assert_eq!(b.clear().await.expect("clear"), 1);
        assert_eq!(a.get("secret").await.expect("get"), Some(json!("a-only")));
    }

    #[tokio::test]
    async fn test_revoked_handle_refuses_calls() {
        let storage = PluginStorage::new("gone", backend());
        let clone = storage.clone();
        storage.revoke();
        assert!(matches!(
            clone.get("k").await,
            Err(PluginError::Lifecycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_typed_access_and_timestamps() {
        let storage = PluginStorage::new("typed", backend());
        storage.set_as("count", &3u32).await.expect("set");
        let first = storage.get_entry("count").await.expect("get").expect("present");
        storage.set_as("count", &4u32).await.expect("set");
        let second = storage.get_entry("count").await.expect("get").expect("present");

        assert_eq!(storage.get_as::<u32>("count").await.expect("get"), Some(4));
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert!(storage.set("", json!(0)).await.is_err());
    }
}
