//! Host-side capability services offered to extensions.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use tracing::debug;

use plexus_core::config::AppConfig;
use plexus_plugin::PluginError;
use plexus_plugin::PluginResult;
use plexus_plugin::api::{CacheService, ConfigurationService, FilesystemService};

const HOST: &str = "host";

#[derive(Clone)]
struct CachedValue {
    value: String,
    ttl: Option<Duration>,
}

struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Shared in-process cache backed by moka.
///
/// Extensions reach it through a [`plexus_plugin::api::PrefixedCache`], so
/// keys never collide across plugins.
#[derive(Clone)]
pub struct MemoryCacheService {
    cache: Cache<String, CachedValue>,
}

impl MemoryCacheService {
    /// Create a cache holding at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl CacheService for MemoryCacheService {
    async fn get(&self, key: &str) -> PluginResult<Option<String>> {
        Ok(self.cache.get(key).await.map(|v| v.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> PluginResult<()> {
        self.cache
            .insert(
                key.to_string(),
                CachedValue {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> PluginResult<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }
}

/// Filesystem access confined to one root directory.
#[derive(Debug, Clone)]
pub struct SandboxedFilesystem {
    root: PathBuf,
}

impl SandboxedFilesystem {
    /// Creates the sandbox, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> PluginResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PluginError::handler(HOST, format!("cannot create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Maps a sandbox-relative path onto the root, refusing escapes.
    fn resolve(&self, path: &str) -> PluginResult<PathBuf> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(PluginError::permission(
                        HOST,
                        format!("path '{path}' leaves the sandbox"),
                    ));
                }
            }
        }
        Ok(resolved)
    }
}

fn io_error(path: &str, e: std::io::Error) -> PluginError {
    PluginError::handler(HOST, format!("'{path}': {e}"))
}

#[async_trait]
impl FilesystemService for SandboxedFilesystem {
    async fn read(&self, path: &str) -> PluginResult<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(|e| io_error(path, e))
    }

    async fn write(&self, path: &str, data: &[u8]) -> PluginResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }
        tokio::fs::write(&full, data).await.map_err(|e| io_error(path, e))?;
        debug!(path = %path, bytes = data.len(), "Sandbox file written");
        Ok(())
    }

    async fn list(&self, path: &str) -> PluginResult<Vec<String>> {
        let full = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&full).await.map_err(|e| io_error(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(path, e))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, path: &str) -> PluginResult<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path, e)),
        }
    }
}

/// Read-only view of the host configuration, addressed by dotted keys.
#[derive(Debug, Clone)]
pub struct HostConfiguration {
    tree: serde_json::Value,
}

impl HostConfiguration {
    /// Snapshots `config`. Per-plugin settings are left out.
    pub fn new(config: &AppConfig) -> Self {
        let mut tree = serde_json::to_value(config).unwrap_or_default();
        if let Some(plugins) = tree.get_mut("plugins").and_then(|p| p.as_object_mut()) {
            plugins.remove("settings");
        }
        Self { tree }
    }
}

impl ConfigurationService for HostConfiguration {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        key.split('.')
            .try_fold(&self.tree, |node, part| node.get(part))
            .cloned()
    }
}
