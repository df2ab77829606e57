//! Capability gating between plugins and host services.

use std::fmt;
use std::sync::Arc;

use plexus_core::{Capability, CapabilitySet};
use tracing::{debug, warn};

use crate::api::services::{
    CacheService, ConfigurationService, DatabaseService, FilesystemService, HostServices,
    InMemoryMetrics, MetricsService, NetworkService, PrefixedCache, ProcessService,
    RouterService, ScopedMetrics,
};
use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginDescriptor;

/// Capabilities the host refuses to grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostPolicy {
    denied: CapabilitySet,
}

impl HostPolicy {
    /// Grants every requested capability.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Denies the listed capabilities.
    pub fn denying(denied: &[Capability]) -> Self {
        Self {
            denied: denied.iter().copied().collect(),
        }
    }

    /// Adds `capability` to the denied set.
    pub fn deny(mut self, capability: Capability) -> Self {
        self.denied.insert(capability);
        self
    }

    /// Returns whether `capability` is denied.
    pub fn is_denied(&self, capability: Capability) -> bool {
        self.denied.contains(capability)
    }
}

/// Validates requested capabilities and builds scoped service sets.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    policy: HostPolicy,
    fallback_metrics: Arc<InMemoryMetrics>,
}

impl PermissionGate {
    /// Creates a gate enforcing `policy`.
    pub fn new(policy: HostPolicy) -> Self {
        Self {
            policy,
            fallback_metrics: Arc::new(InMemoryMetrics::new()),
        }
    }

    /// Returns the policy.
    pub fn policy(&self) -> &HostPolicy {
        &self.policy
    }

    /// Metrics recorder used when the host provides none.
    pub fn fallback_metrics(&self) -> &Arc<InMemoryMetrics> {
        &self.fallback_metrics
    }

    /// Returns the granted capability set, or the first denied capability.
    pub fn validate(&self, descriptor: &PluginDescriptor) -> PluginResult<CapabilitySet> {
        if let Some(denied) = descriptor
            .capabilities
            .iter()
            .find(|c| self.policy.is_denied(*c))
        {
            warn!(plugin = %descriptor.name, capability = %denied, "Capability denied by host policy");
            return Err(PluginError::permission(
                &descriptor.name,
                format!("capability '{denied}' is denied by host policy"),
            ));
        }
        debug!(plugin = %descriptor.name, granted = %descriptor.capabilities, "Capabilities granted");
        Ok(descriptor.capabilities)
    }

    /// Copies the granted subset of `host` into a plugin-scoped set.
    pub fn scope(&self, plugin: &str, granted: CapabilitySet, host: &HostServices) -> ScopedServices {
        fn pick<T: ?Sized>(
            granted: CapabilitySet,
            capability: Capability,
            service: &Option<Arc<T>>,
        ) -> Option<Arc<T>> {
            if granted.contains(capability) {
                service.clone()
            } else {
                None
            }
        }

        let metrics = host
            .metrics
            .clone()
            .unwrap_or_else(|| self.fallback_metrics.clone() as Arc<dyn MetricsService>);

        ScopedServices {
            plugin: plugin.to_string(),
            granted,
            database: pick(granted, Capability::Database, &host.database),
            cache: pick(granted, Capability::Cache, &host.cache)
                .map(|inner| Arc::new(PrefixedCache::new(inner, plugin)) as Arc<dyn CacheService>),
            router: pick(granted, Capability::Router, &host.router),
            configuration: pick(granted, Capability::Configuration, &host.configuration),
            filesystem: pick(granted, Capability::Filesystem, &host.filesystem),
            network: pick(granted, Capability::Network, &host.network),
            process: pick(granted, Capability::ProcessExecution, &host.process),
            metrics: Arc::new(ScopedMetrics::new(metrics, plugin)),
        }
    }
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new(HostPolicy::allow_all())
    }
}

/// The host services one plugin may use.
///
/// Services for capabilities that were not granted are never copied in, so
/// an accessor for one of them fails on every call.
#[derive(Clone)]
pub struct ScopedServices {
    plugin: String,
    granted: CapabilitySet,
    database: Option<Arc<dyn DatabaseService>>,
    cache: Option<Arc<dyn CacheService>>,
    router: Option<Arc<dyn RouterService>>,
    configuration: Option<Arc<dyn ConfigurationService>>,
    filesystem: Option<Arc<dyn FilesystemService>>,
    network: Option<Arc<dyn NetworkService>>,
    process: Option<Arc<dyn ProcessService>>,
    metrics: Arc<dyn MetricsService>,
}

impl ScopedServices {
    fn access<T: ?Sized>(&self, capability: Capability, slot: &Option<Arc<T>>) -> PluginResult<Arc<T>> {
        if !self.granted.contains(capability) {
            return Err(PluginError::permission(
                &self.plugin,
                format!("capability '{capability}' was not granted"),
            ));
        }
        slot.clone().ok_or_else(|| PluginError::CapabilityUnavailable {
            capability: capability.to_string(),
        })
    }

    /// Granted capabilities.
    pub fn granted(&self) -> CapabilitySet {
        self.granted
    }

    /// Returns whether `capability` was granted.
    pub fn has(&self, capability: Capability) -> bool {
        self.granted.contains(capability)
    }

    /// Database service.
    pub fn database(&self) -> PluginResult<Arc<dyn DatabaseService>> {
        self.access(Capability::Database, &self.database)
    }

    /// Cache service, confined to `plugin:<name>:` keys.
    pub fn cache(&self) -> PluginResult<Arc<dyn CacheService>> {
        self.access(Capability::Cache, &self.cache)
    }

    /// Router service.
    pub fn router(&self) -> PluginResult<Arc<dyn RouterService>> {
        self.access(Capability::Router, &self.router)
    }

    /// Host configuration.
    pub fn configuration(&self) -> PluginResult<Arc<dyn ConfigurationService>> {
        self.access(Capability::Configuration, &self.configuration)
    }

    /// Filesystem service.
    pub fn filesystem(&self) -> PluginResult<Arc<dyn FilesystemService>> {
        self.access(Capability::Filesystem, &self.filesystem)
    }

    /// Network service.
    pub fn network(&self) -> PluginResult<Arc<dyn NetworkService>> {
        self.access(Capability::Network, &self.network)
    }

    /// Process execution service.
    pub fn process(&self) -> PluginResult<Arc<dyn ProcessService>> {
        self.access(Capability::ProcessExecution, &self.process)
    }

    /// Metrics, prefixed with `plugin.<name>.`.
    pub fn metrics(&self) -> Arc<dyn MetricsService> {
        Arc::clone(&self.metrics)
    }
}

impl fmt::Debug for ScopedServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedServices")
            .field("plugin", &self.plugin)
            .field("granted", &self.granted.to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::services::ConfigurationService;
    use crate::manifest::{PermissionSet, PluginManifest};

    struct StaticConfig;

    impl ConfigurationService for StaticConfig {
        fn get(&self, key: &str) -> Option<serde_json::Value> {
            (key == "region").then(|| serde_json::json!("eu"))
        }
    }

    fn descriptor(permissions: PermissionSet) -> PluginDescriptor {
        PluginManifest {
            name: "probe".into(),
            version: "1.0.0".into(),
            permissions,
            ..Default::default()
        }
        .into_descriptor()
        .expect("valid")
    }

    #[test]
    fn test_denied_capability_names_the_first() {
        let gate = PermissionGate::new(HostPolicy::denying(&[Capability::Network, Capability::ProcessExecution]));
        let d = descriptor(PermissionSet {
            cache: true,
            network: true,
            exec: true,
            ..Default::default()
        });
        let err = gate.validate(&d).expect_err("denied");
        assert!(matches!(err, PluginError::Permission { .. }));
        assert!(err.to_string().contains("'network'"));
    }

    #[test]
    fn test_ungranted_accessor_always_fails() {
        let gate = PermissionGate::default();
        let d = descriptor(PermissionSet::default());
        let granted = gate.validate(&d).expect("nothing requested");
        let host = HostServices::new().with_configuration(Arc::new(StaticConfig));
        let scoped = gate.scope("probe", granted, &host);

        for _ in 0..3 {
            assert!(matches!(scoped.database(), Err(PluginError::Permission { .. })));
            assert!(matches!(scoped.configuration(), Err(PluginError::Permission { .. })));
        }
    }

    #[test]
    fn test_granted_but_unprovided() {
        let gate = PermissionGate::default();
        let d = descriptor(PermissionSet {
            database: true,
            config: true,
            ..Default::default()
        });
        let granted = gate.validate(&d).expect("granted");
        let host = HostServices::new().with_configuration(Arc::new(StaticConfig));
        let scoped = gate.scope("probe", granted, &host);

        assert!(matches!(
            scoped.database(),
            Err(PluginError::CapabilityUnavailable { .. })
        ));
        let config = scoped.configuration().expect("provided");
        assert_eq!(config.get("region"), Some(serde_json::json!("eu")));
    }
}
