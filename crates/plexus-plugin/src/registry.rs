//! Plugin catalog: the static set of extension factories a host knows about.
//!
//! The host bootstrap owns a [`PluginRegistry`] and registers every
//! compiled-in extension explicitly. Registration probes the factory once to
//! read the extension's metadata; live instances are created later by the
//! manager through [`PluginRegistry::instantiate`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::manifest::{PluginDescriptor, PluginManifest};
use crate::safety::guard_sync;
use crate::traits::{Plugin, PluginFactory};

/// Catalog row for the admin view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Plugin description.
    pub description: String,
    /// Author or maintainer.
    pub author: String,
    /// Dependency names, optional ones suffixed with `?`.
    pub dependencies: Vec<String>,
    /// Requested capabilities.
    pub capabilities: String,
    /// Declared hook types.
    pub hooks: Vec<String>,
    /// Exported service names.
    pub exports: Vec<String>,
}

impl PluginInfo {
    /// Builds the row for `descriptor`.
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            version: descriptor.version.to_string(),
            description: descriptor.description.clone(),
            author: descriptor.author.clone(),
            dependencies: descriptor
                .dependencies
                .iter()
                .map(|d| {
                    if d.optional {
                        format!("{}?", d.name)
                    } else {
                        d.name.clone()
                    }
                })
                .collect(),
            capabilities: descriptor.capabilities.to_string(),
            hooks: descriptor
                .hooks
                .iter()
                .map(|h| h.hook_type.to_string())
                .collect(),
            exports: descriptor.exports.clone(),
        }
    }
}

struct CatalogEntry {
    descriptor: Arc<PluginDescriptor>,
    factory: PluginFactory,
}

#[derive(Default)]
struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

/// Registry of extension factories, in registration order.
pub struct PluginRegistry {
    catalog: RwLock<Catalog>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
        }
    }

    /// Registers `factory` under `name`, describing it from its own metadata.
    pub async fn register(&self, name: &str, factory: PluginFactory) -> PluginResult<Arc<PluginDescriptor>> {
        let probe = probe(name, &factory)?;
        let descriptor = probe.manifest().into_descriptor()?;
        self.insert(descriptor, factory).await
    }

    /// Registers `factory` with a descriptor taken from `manifest`.
    ///
    /// The manifest must name the same plugin the factory builds.
    pub async fn register_with_manifest(
        &self,
        manifest: PluginManifest,
        factory: PluginFactory,
    ) -> PluginResult<Arc<PluginDescriptor>> {
        let probe = probe(&manifest.name, &factory)?;
        if probe.version() != manifest.version {
            warn!(
                plugin = %manifest.name,
                manifest = %manifest.version,
                built = %probe.version(),
                "Manifest version differs from the compiled plugin"
            );
        }
        let descriptor = manifest.into_descriptor()?;
        self.insert(descriptor, factory).await
    }

    async fn insert(
        &self,
        descriptor: PluginDescriptor,
        factory: PluginFactory,
    ) -> PluginResult<Arc<PluginDescriptor>> {
        let mut catalog = self.catalog.write().await;
        if catalog.index.contains_key(&descriptor.name) {
            return Err(PluginError::registration(
                &descriptor.name,
                "a plugin with this name is already registered",
            ));
        }

        info!(
            plugin = %descriptor.name,
            version = %descriptor.version,
            capabilities = %descriptor.capabilities,
            "Registering plugin"
        );

        let descriptor = Arc::new(descriptor);
        let position = catalog.entries.len();
        catalog.index.insert(descriptor.name.clone(), position);
        catalog.entries.push(CatalogEntry {
            descriptor: Arc::clone(&descriptor),
            factory,
        });
        Ok(descriptor)
    }

    /// Returns the descriptor of `name`.
    pub async fn descriptor(&self, name: &str) -> Option<Arc<PluginDescriptor>> {
        let catalog = self.catalog.read().await;
        catalog
            .index
            .get(name)
            .map(|&i| Arc::clone(&catalog.entries[i].descriptor))
    }

    /// All descriptors in registration order.
    pub async fn descriptors(&self) -> Vec<Arc<PluginDescriptor>> {
        let catalog = self.catalog.read().await;
        catalog
            .entries
            .iter()
            .map(|e| Arc::clone(&e.descriptor))
            .collect()
    }

    /// Builds a fresh instance of `name`.
    pub async fn instantiate(&self, name: &str) -> PluginResult<Box<dyn Plugin>> {
        let factory = {
            let catalog = self.catalog.read().await;
            let &i = catalog.index.get(name).ok_or_else(|| PluginError::UnknownPlugin {
                plugin: name.to_string(),
            })?;
            Arc::clone(&catalog.entries[i].factory)
        };
        debug!(plugin = %name, "Instantiating plugin");
        guard_sync(name, "construction", || factory())
    }

    /// Checks whether `name` is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.catalog.read().await.index.contains_key(name)
    }

    /// Returns the number of registered plugins.
    pub async fn count(&self) -> usize {
        self.catalog.read().await.entries.len()
    }

    /// Catalog rows in registration order.
    pub async fn list(&self) -> Vec<PluginInfo> {
        let catalog = self.catalog.read().await;
        catalog
            .entries
            .iter()
            .map(|e| PluginInfo::from_descriptor(&e.descriptor))
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").finish_non_exhaustive()
    }
}

/// Builds one instance to read its metadata and checks its name.
fn probe(name: &str, factory: &PluginFactory) -> PluginResult<Box<dyn Plugin>> {
    let probe = guard_sync(name, "construction", || factory())?;
    if probe.name() != name {
        return Err(PluginError::manifest(
            name,
            format!("factory builds plugin '{}'", probe.name()),
        ));
    }
    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PluginContext;
    use crate::manifest::{DependencySpec, PermissionSet};
    use crate::traits::factory;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn version(&self) -> &str {
            "1.2.0"
        }

        fn dependencies(&self) -> Vec<DependencySpec> {
            vec![DependencySpec::optional("metrics", "^1")]
        }

        async fn initialize(&mut self, _ctx: PluginContext) -> PluginResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_list_in_order() {
        let registry = PluginRegistry::new();
        registry.register("zeta", factory(|| Named("zeta"))).await.expect("zeta");
        registry.register("alpha", factory(|| Named("alpha"))).await.expect("alpha");

        assert_eq!(registry.count().await, 2);
        let names: Vec<String> = registry.list().await.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        let info = &registry.list().await[0];
        assert_eq!(info.dependencies, vec!["metrics?".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_and_mismatch_rejected() {
        let registry = PluginRegistry::new();
        registry.register("a", factory(|| Named("a"))).await.expect("first");

        let dup = registry.register("a", factory(|| Named("a"))).await;
        assert!(matches!(dup, Err(PluginError::Registration { .. })));

        let mismatch = registry.register("b", factory(|| Named("c"))).await;
        assert!(matches!(mismatch, Err(PluginError::Manifest { .. })));
        assert!(!registry.contains("b").await);
    }

    #[tokio::test]
    async fn test_manifest_overrides_metadata() {
        let registry = PluginRegistry::new();
        let manifest = PluginManifest {
            name: "audit".into(),
            version: "1.2.0".into(),
            permissions: PermissionSet {
                cache: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let descriptor = registry
            .register_with_manifest(manifest, factory(|| Named("audit")))
            .await
            .expect("registered");
        assert!(descriptor.capabilities.contains(plexus_core::Capability::Cache));
        assert!(descriptor.dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_instantiate_unknown_and_panicking() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.instantiate("ghost").await,
            Err(PluginError::UnknownPlugin { .. })
        ));

        let flaky = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let armed = flaky.clone();
        let f: PluginFactory = Arc::new(move || {
            if armed.load(std::sync::atomic::Ordering::SeqCst) {
                panic!("constructor exploded");
            }
            Box::new(Named("flaky")) as Box<dyn Plugin>
        });
        registry.register("flaky", f).await.expect("probe succeeds");
        flaky.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = registry.instantiate("flaky").await.err().expect("panicked");
        assert!(err.to_string().contains("constructor exploded"));
    }
}
