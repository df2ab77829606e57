//! In-memory storage backend.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StorageBackend, StorageEntry};
use crate::error::PluginResult;

/// Process-local storage; data lives as long as the backend.
#[derive(Debug, Default)]
pub struct MemoryStorageBackend {
    entries: DashMap<(String, String), StorageEntry>,
}

impl MemoryStorageBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, namespace: &str, key: &str) -> PluginResult<Option<StorageEntry>> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|e| e.value().clone()))
    }

    async fn set(&self, namespace: &str, key: &str, value: serde_json::Value) -> PluginResult<()> {
        self.entries
            .entry((namespace.to_string(), key.to_string()))
            .and_modify(|e| e.update(value.clone()))
            .or_insert_with(|| StorageEntry::new(value));
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> PluginResult<bool> {
        Ok(self
            .entries
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    async fn list(&self, namespace: &str) -> PluginResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == namespace)
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self, namespace: &str) -> PluginResult<usize> {
        let mut removed = 0;
        self.entries.retain(|(ns, _), _| {
            let keep = ns != namespace;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
