//! Host capability services exposed to plugins through their context.
//!
//! The host supplies whichever implementations it has in [`HostServices`];
//! the permission gate copies only the granted ones into each plugin's
//! context.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PluginResult;
use crate::middleware::Endpoint;

/// Database operations available to plugins.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Runs a statement and returns the affected row count.
    async fn execute(&self, statement: &str, params: &[serde_json::Value]) -> PluginResult<u64>;
    /// Runs a query and returns rows as JSON objects.
    async fn query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> PluginResult<Vec<serde_json::Value>>;
}

/// Cache operations available to plugins.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Gets a value from cache.
    async fn get(&self, key: &str) -> PluginResult<Option<String>>;
    /// Sets a value in cache.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> PluginResult<()>;
    /// Deletes a value from cache.
    async fn delete(&self, key: &str) -> PluginResult<bool>;
}

/// Route registration on the host router.
#[async_trait]
pub trait RouterService: Send + Sync {
    /// Mounts `endpoint` at `method` `path`.
    async fn add_route(&self, method: &str, path: &str, endpoint: Arc<dyn Endpoint>) -> PluginResult<()>;
    /// Removes a route previously added.
    async fn remove_route(&self, method: &str, path: &str) -> PluginResult<bool>;
}

/// Read access to host configuration.
pub trait ConfigurationService: Send + Sync {
    /// Reads a dotted configuration key, e.g. `runtime.hook_timeout_seconds`.
    fn get(&self, key: &str) -> Option<serde_json::Value>;
}

/// Sandboxed filesystem operations.
#[async_trait]
pub trait FilesystemService: Send + Sync {
    /// Reads a file relative to the sandbox root.
    async fn read(&self, path: &str) -> PluginResult<Vec<u8>>;
    /// Writes a file relative to the sandbox root.
    async fn write(&self, path: &str, data: &[u8]) -> PluginResult<()>;
    /// Lists entries of a directory relative to the sandbox root.
    async fn list(&self, path: &str) -> PluginResult<Vec<String>>;
    /// Deletes a file relative to the sandbox root.
    async fn delete(&self, path: &str) -> PluginResult<bool>;
}

/// Outbound network access.
#[async_trait]
pub trait NetworkService: Send + Sync {
    /// Performs a request and returns the decoded JSON response body.
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> PluginResult<serde_json::Value>;
}

/// Output of a process run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code, if the process exited normally.
    pub status: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Process execution.
#[async_trait]
pub trait ProcessService: Send + Sync {
    /// Runs `program` with `args` to completion.
    async fn run(&self, program: &str, args: &[String]) -> PluginResult<ProcessOutput>;
}

/// Metrics recording; always available.
pub trait MetricsService: Send + Sync {
    /// Adds `value` to counter `name`.
    fn increment(&self, name: &str, value: u64);
    /// Sets gauge `name`.
    fn gauge(&self, name: &str, value: f64);
}

/// Implementations the host provides for each capability.
#[derive(Clone, Default)]
pub struct HostServices {
    /// Database.
    pub database: Option<Arc<dyn DatabaseService>>,
    /// Shared cache.
    pub cache: Option<Arc<dyn CacheService>>,
    /// Router.
    pub router: Option<Arc<dyn RouterService>>,
    /// Host configuration.
    pub configuration: Option<Arc<dyn ConfigurationService>>,
    /// Filesystem.
    pub filesystem: Option<Arc<dyn FilesystemService>>,
    /// Network.
    pub network: Option<Arc<dyn NetworkService>>,
    /// Process execution.
    pub process: Option<Arc<dyn ProcessService>>,
    /// Metrics; an in-memory recorder is used when absent.
    pub metrics: Option<Arc<dyn MetricsService>>,
}

impl HostServices {
    /// No host services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database service.
    pub fn with_database(mut self, service: Arc<dyn DatabaseService>) -> Self {
        self.database = Some(service);
        self
    }

    /// Sets the cache service.
    pub fn with_cache(mut self, service: Arc<dyn CacheService>) -> Self {
        self.cache = Some(service);
        self
    }

    /// Sets the router service.
    pub fn with_router(mut self, service: Arc<dyn RouterService>) -> Self {
        self.router = Some(service);
        self
    }

    /// Sets the configuration service.
    pub fn with_configuration(mut self, service: Arc<dyn ConfigurationService>) -> Self {
        self.configuration = Some(service);
        self
    }

    /// Sets the filesystem service.
    pub fn with_filesystem(mut self, service: Arc<dyn FilesystemService>) -> Self {
        self.filesystem = Some(service);
        self
    }

    /// Sets the network service.
    pub fn with_network(mut self, service: Arc<dyn NetworkService>) -> Self {
        self.network = Some(service);
        self
    }

    /// Sets the process service.
    pub fn with_process(mut self, service: Arc<dyn ProcessService>) -> Self {
        self.process = Some(service);
        self
    }

    /// Sets the metrics service.
    pub fn with_metrics(mut self, service: Arc<dyn MetricsService>) -> Self {
        self.metrics = Some(service);
        self
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("database", &self.database.is_some())
            .field("cache", &self.cache.is_some())
            .field("router", &self.router.is_some())
            .field("configuration", &self.configuration.is_some())
            .field("filesystem", &self.filesystem.is_some())
            .field("network", &self.network.is_some())
            .field("process", &self.process.is_some())
            .finish_non_exhaustive()
    }
}

/// Cache wrapper that confines a plugin to its own key prefix.
#[derive(Clone)]
pub struct PrefixedCache {
    inner: Arc<dyn CacheService>,
    prefix: String,
}

impl PrefixedCache {
    /// Wraps `inner` for `plugin`.
    pub fn new(inner: Arc<dyn CacheService>, plugin: &str) -> Self {
        Self {
            inner,
            prefix: format!("plugin:{plugin}:"),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheService for PrefixedCache {
    async fn get(&self, key: &str) -> PluginResult<Option<String>> {
        self.inner.get(&self.key(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> PluginResult<()> {
        self.inner.set(&self.key(key), value, ttl).await
    }

    async fn delete(&self, key: &str) -> PluginResult<bool> {
        self.inner.delete(&self.key(key)).await
    }
}

/// Metrics recorder kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
    gauges: DashMap<String, f64>,
}

impl InMemoryMetrics {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of counter `name`.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    /// Current value of gauge `name`.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|v| *v)
    }
}

impl MetricsService for InMemoryMetrics {
    fn increment(&self, name: &str, value: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += value;
    }

    fn gauge(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }
}

/// Metrics wrapper that prefixes every name with the plugin name.
pub(crate) struct ScopedMetrics {
    inner: Arc<dyn MetricsService>,
    prefix: String,
}

impl ScopedMetrics {
    pub(crate) fn new(inner: Arc<dyn MetricsService>, plugin: &str) -> Self {
        Self {
            inner,
            prefix: format!("plugin.{plugin}."),
        }
    }
}

impl MetricsService for ScopedMetrics {
    fn increment(&self, name: &str, value: u64) {
        self.inner.increment(&format!("{}{name}", self.prefix), value);
    }

    fn gauge(&self, name: &str, value: f64) {
        self.inner.gauge(&format!("{}{name}", self.prefix), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapCache(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl CacheService for MapCache {
        async fn get(&self, key: &str) -> PluginResult<Option<String>> {
            Ok(self.0.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> PluginResult<()> {
            self.0.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> PluginResult<bool> {
            Ok(self.0.lock().remove(key).is_some())
        }
    }

    #[tokio::test]
    async fn test_prefixed_cache_isolates_keys() {
        let shared = Arc::new(MapCache::default());
        let a = PrefixedCache::new(shared.clone(), "a");
        let b = PrefixedCache::new(shared.clone(), "b");

        a.set("token", "A", None).await.expect("set");
        assert_eq!(b.get("token").await.expect("get"), None);
        assert_eq!(a.get("token").await.expect("get"), Some("A".to_string()));
        assert!(shared.0.lock().contains_key("plugin:a:token"));
    }

    #[test]
    fn test_scoped_metrics_prefix() {
        let recorder = Arc::new(InMemoryMetrics::new());
        let scoped = ScopedMetrics::new(recorder.clone(), "audit");
        scoped.increment("requests", 2);
        scoped.increment("requests", 1);
        scoped.gauge("queue", 0.5);
        assert_eq!(recorder.counter("plugin.audit.requests"), 3);
        assert_eq!(recorder.gauge_value("plugin.audit.queue"), Some(0.5));
    }
}
