//! The extension contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::PluginContext;
use crate::error::PluginResult;
use crate::manifest::{
    ConfigSchema, DependencySpec, EventDeclarations, HookDeclaration, PermissionSet, PluginManifest,
};

/// Trait that all plugins must implement.
///
/// The metadata methods describe the plugin; the registry reads them once,
/// from a probe instance, to build the plugin's descriptor. The async methods
/// are lifecycle callbacks driven by the
/// [`PluginManager`](crate::manager::PluginManager), each under a timeout and
/// with panics converted into errors.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Globally unique name.
    fn name(&self) -> &str;

    /// Semver version string.
    fn version(&self) -> &str;

    /// Short description.
    fn description(&self) -> &str {
        ""
    }

    /// Author or maintainer.
    fn author(&self) -> &str {
        ""
    }

    /// Host framework versions this plugin runs on.
    fn framework_version_constraint(&self) -> Option<&str> {
        None
    }

    /// Plugins this one depends on.
    fn dependencies(&self) -> Vec<DependencySpec> {
        Vec::new()
    }

    /// Capabilities requested from the host.
    fn permissions(&self) -> PermissionSet {
        PermissionSet::default()
    }

    /// Hooks this plugin registers.
    fn hooks(&self) -> Vec<HookDeclaration> {
        Vec::new()
    }

    /// Event topics published and subscribed.
    fn events(&self) -> EventDeclarations {
        EventDeclarations::default()
    }

    /// Service names this plugin exports.
    fn exports(&self) -> Vec<String> {
        Vec::new()
    }

    /// Schema of the plugin configuration.
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    /// Builds the manifest from the metadata methods.
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            name: self.name().to_string(),
            version: self.version().to_string(),
            description: self.description().to_string(),
            author: self.author().to_string(),
            framework_version_constraint: self.framework_version_constraint().map(str::to_string),
            dependencies: self.dependencies(),
            permissions: self.permissions(),
            config: self.config_schema(),
            hooks: self.hooks(),
            events: self.events(),
            exports: self.exports(),
        }
    }

    /// Called once after construction with the plugin's scoped context.
    async fn initialize(&mut self, ctx: PluginContext) -> PluginResult<()>;

    /// Called when the plugin starts serving.
    async fn start(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the plugin stops serving; background tasks are already joined.
    async fn stop(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Called before the instance is dropped.
    async fn cleanup(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Called with the validated configuration after an update.
    async fn on_config_change(&mut self, _config: &serde_json::Value) -> PluginResult<()> {
        Ok(())
    }
}

/// Builds fresh plugin instances.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Wraps a constructor function as a [`PluginFactory`].
pub fn factory<P, F>(constructor: F) -> PluginFactory
where
    P: Plugin + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    Arc::new(move || Box::new(constructor()) as Box<dyn Plugin>)
}
