//! Typed export/import of plugin-provided services.
//!
//! A binding is keyed by `(exporting plugin, service name)` and holds an
//! `Arc<T>` for whatever `T` the exporter chose, usually a trait object such
//! as `dyn CacheApi`. Importers name the same `T` and get the `Arc<T>` back;
//! asking for a different type is a [`PluginError::ServiceTypeMismatch`]
//! rather than a failed downcast at the call site.

use std::any::{Any, type_name};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{PluginError, PluginResult};

type ServiceKey = (String, String);

struct Binding {
    /// Holds an `Arc<T>`.
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    exported_at: DateTime<Utc>,
}

/// Row of [`ServiceRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Exporting plugin.
    pub plugin: String,
    /// Service name.
    pub service: String,
    /// Exported type.
    pub type_name: &'static str,
    /// When the current binding was exported.
    pub exported_at: DateTime<Utc>,
}

/// Registry of exported services.
#[derive(Default)]
pub struct ServiceRegistry {
    bindings: DashMap<ServiceKey, Binding>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `service` for `owner`, replacing any previous binding.
    pub fn export<T>(&self, owner: &str, service: &str, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let binding = Binding {
            value: Arc::new(value),
            type_name: type_name::<T>(),
            exported_at: Utc::now(),
        };
        let replaced = self
            .bindings
            .insert((owner.to_string(), service.to_string()), binding)
            .is_some();
        info!(plugin = %owner, service = %service, replaced, "Service exported");
    }

    /// Returns the binding for `(plugin, service)` as an `Arc<T>`.
    pub fn import<T>(&self, plugin: &str, service: &str) -> PluginResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = (plugin.to_string(), service.to_string());
        let binding = self
            .bindings
            .get(&key)
            .ok_or_else(|| PluginError::ServiceNotFound {
                plugin: plugin.to_string(),
                service: service.to_string(),
            })?;
        let value = Arc::clone(&binding.value);
        drop(binding);

        value
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| PluginError::ServiceTypeMismatch {
                plugin: plugin.to_string(),
                service: service.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Returns whether `(plugin, service)` is bound.
    pub fn contains(&self, plugin: &str, service: &str) -> bool {
        self.bindings
            .contains_key(&(plugin.to_string(), service.to_string()))
    }

    /// Removes one binding.
    pub fn remove(&self, plugin: &str, service: &str) -> bool {
        self.bindings
            .remove(&(plugin.to_string(), service.to_string()))
            .is_some()
    }

    /// Removes every binding exported by `owner`.
    pub fn remove_plugin(&self, owner: &str) -> usize {
        let mut removed = 0;
        self.bindings.retain(|(plugin, _), _| {
            let keep = plugin != owner;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!(plugin = %owner, removed, "Services withdrawn");
        }
        removed
    }

    /// Lists every binding, sorted by plugin then service.
    pub fn list(&self) -> Vec<ServiceInfo> {
        let mut rows: Vec<ServiceInfo> = self
            .bindings
            .iter()
            .map(|entry| ServiceInfo {
                plugin: entry.key().0.clone(),
                service: entry.key().1.clone(),
                type_name: entry.value().type_name,
                exported_at: entry.value().exported_at,
            })
            .collect();
        rows.sort_by(|a, b| (&a.plugin, &a.service).cmp(&(&b.plugin, &b.service)));
        rows
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_trait_object_round_trip() {
        let registry = ServiceRegistry::new();
        registry.export::<dyn Greeter>("i18n", "Greeter", Arc::new(English));

        let greeter = registry.import::<dyn Greeter>("i18n", "Greeter").expect("bound");
        assert_eq!(greeter.greet(), "hello");
    }

    #[test]
    fn test_missing_and_mismatched() {
        let registry = ServiceRegistry::new();
        registry.export("counter", "Total", Arc::new(5u64));

        assert!(matches!(
            registry.import::<u64>("counter", "Other"),
            Err(PluginError::ServiceNotFound { .. })
        ));
        assert!(matches!(
            registry.import::<String>("counter", "Total"),
            Err(PluginError::ServiceTypeMismatch { .. })
        ));
        assert_eq!(*registry.import::<u64>("counter", "Total").expect("bound"), 5);
    }

    #[test]
    fn test_reexport_replaces_and_remove_plugin() {
        let registry = ServiceRegistry::new();
        registry.export("a", "Value", Arc::new(1u32));
        registry.export("a", "Value", Arc::new(2u32));
        registry.export("a", "Other", Arc::new(3u32));
        registry.export("b", "Value", Arc::new(4u32));

        assert_eq!(*registry.import::<u32>("a", "Value").expect("bound"), 2);
        assert_eq!(registry.list().len(), 3);
        assert_eq!(registry.remove_plugin("a"), 2);
        assert!(!registry.contains("a", "Value"));
        assert!(registry.contains("b", "Value"));
    }
}
