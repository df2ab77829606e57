//! Plugin context: the only door from a plugin into the runtime.
//!
//! Each plugin instance receives its own context at `initialize`. Every
//! registration made through it is recorded against the plugin's name, so
//! the manager can release all of them on cleanup. Hooks and middleware
//! registered before the plugin reaches `Started` are staged and published
//! together once it does.

use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use plexus_core::Capability;
use plexus_core::types::SubscriptionId;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, warn};

use super::services::{
    CacheService, ConfigurationService, DatabaseService, FilesystemService, MetricsService,
    NetworkService, ProcessService, RouterService,
};
use crate::error::{PluginError, PluginResult};
use crate::events::{DeliveryReport, EventBus, EventHandler};
use crate::hooks::{HookHandler, HookRegistration, HookRegistry, HookType};
use crate::manifest::PluginDescriptor;
use crate::middleware::{Middleware, MiddlewareRegistration, MiddlewareRegistry, RouteScope};
use crate::permission::ScopedServices;
use crate::services::ServiceRegistry;
use crate::storage::PluginStorage;
use crate::tasks::TaskSupervisor;

/// Shared runtime registries handed to every context.
#[derive(Clone)]
pub(crate) struct RuntimeHandles {
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) middleware: Arc<MiddlewareRegistry>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) services: Arc<ServiceRegistry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Registrations are collected.
    Staging,
    /// Registrations are published immediately.
    Live,
    /// The instance was cleaned up; registrations are refused.
    Closed,
}

struct StagingState {
    phase: Phase,
    hooks: Vec<HookRegistration>,
    middleware: Vec<MiddlewareRegistration>,
}

/// Staged hook and middleware registrations of one instance.
pub(crate) struct Staging {
    state: Mutex<StagingState>,
}

impl Staging {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(StagingState {
                phase: Phase::Staging,
                hooks: Vec::new(),
                middleware: Vec::new(),
            }),
        }
    }

    /// Publishes everything staged in one swap per registry and goes live.
    pub(crate) fn publish(
        &self,
        owner: &str,
        hooks: &HookRegistry,
        middleware: &MiddlewareRegistry,
    ) -> PluginResult<(usize, usize)> {
        let mut state = self.state.lock();
        let staged_hooks = std::mem::take(&mut state.hooks);
        let staged_middleware = std::mem::take(&mut state.middleware);
        let counts = (staged_hooks.len(), staged_middleware.len());

        middleware.commit(owner, staged_middleware)?;
        hooks.commit(owner, staged_hooks);
        state.phase = Phase::Live;
        Ok(counts)
    }

    /// Drops everything staged and refuses further registrations.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Closed;
        state.hooks.clear();
        state.middleware.clear();
    }

    fn closed_error(owner: &str) -> PluginError {
        PluginError::lifecycle(owner, "registration after cleanup")
    }
}

struct ContextInner {
    descriptor: Arc<PluginDescriptor>,
    config: Arc<RwLock<serde_json::Value>>,
    services: ScopedServices,
    runtime: RuntimeHandles,
    storage: PluginStorage,
    tasks: Arc<TaskSupervisor>,
    staging: Arc<Staging>,
    span: Span,
}

/// Scoped context passed to a plugin at initialization.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

impl PluginContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        descriptor: Arc<PluginDescriptor>,
        config: Arc<RwLock<serde_json::Value>>,
        services: ScopedServices,
        runtime: RuntimeHandles,
        storage: PluginStorage,
        tasks: Arc<TaskSupervisor>,
        staging: Arc<Staging>,
    ) -> Self {
        let span = tracing::info_span!("plugin", name = %descriptor.name);
        Self {
            inner: Arc::new(ContextInner {
                descriptor,
                config,
                services,
                runtime,
                storage,
                tasks,
                staging,
                span,
            }),
        }
    }

    /// The plugin's name.
    pub fn plugin_name(&self) -> &str {
        &self.inner.descriptor.name
    }

    /// The plugin's validated descriptor.
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.inner.descriptor
    }

    /// Tracing span carrying the plugin name.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    // --- Configuration ---

    /// The current validated configuration object.
    pub fn config(&self) -> serde_json::Value {
        self.inner.config.read().clone()
    }

    /// One configuration value.
    pub fn config_value(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.config.read().get(key).cloned()
    }

    /// The configuration deserialized into `T`.
    pub fn config_as<T: DeserializeOwned>(&self) -> PluginResult<T> {
        serde_json::from_value(self.config()).map_err(|e| PluginError::InvalidConfig {
            plugin: self.plugin_name().to_string(),
            message: e.to_string(),
        })
    }

    // --- Capability accessors ---

    /// The gated host services.
    pub fn services(&self) -> &ScopedServices {
        &self.inner.services
    }

    /// Database service; requires `database`.
    pub fn database(&self) -> PluginResult<Arc<dyn DatabaseService>> {
        self.inner.services.database()
    }

    /// Cache service; requires `cache`.
    pub fn cache(&self) -> PluginResult<Arc<dyn CacheService>> {
        self.inner.services.cache()
    }

    /// Router service; requires `router`.
    pub fn router(&self) -> PluginResult<Arc<dyn RouterService>> {
        self.inner.services.router()
    }

    /// Host configuration; requires `config`.
    pub fn host_config(&self) -> PluginResult<Arc<dyn ConfigurationService>> {
        self.inner.services.configuration()
    }

    /// Filesystem service; requires `filesystem`.
    pub fn filesystem(&self) -> PluginResult<Arc<dyn FilesystemService>> {
        self.inner.services.filesystem()
    }

    /// Network service; requires `network`.
    pub fn network(&self) -> PluginResult<Arc<dyn NetworkService>> {
        self.inner.services.network()
    }

    /// Process service; requires `exec`.
    pub fn process(&self) -> PluginResult<Arc<dyn ProcessService>> {
        self.inner.services.process()
    }

    /// Metrics recorder.
    pub fn metrics(&self) -> Arc<dyn MetricsService> {
        self.inner.services.metrics()
    }

    // --- Hooks and middleware ---

    /// Registers a hook handler at the manifest-declared priority.
    pub fn register_hook(&self, hook_type: HookType, handler: Arc<dyn HookHandler>) -> PluginResult<()> {
        let priority = self.declared_priority(hook_type)?;
        self.register_hook_with_priority(hook_type, priority, handler)
    }

    /// Registers a hook handler at an explicit priority.
    ///
    /// The hook type must still be declared in the manifest.
    pub fn register_hook_with_priority(
        &self,
        hook_type: HookType,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) -> PluginResult<()> {
        self.declared_priority(hook_type)?;
        let name = self.plugin_name();
        let mut state = self.inner.staging.state.lock();
        match state.phase {
            Phase::Closed => Err(Staging::closed_error(name)),
            Phase::Staging => {
                debug!(plugin = %name, hook = %hook_type, priority, "Hook staged");
                state.hooks.push(HookRegistration {
                    hook_type,
                    priority,
                    handler,
                });
                Ok(())
            }
            Phase::Live => {
                self.inner.runtime.hooks.register(name, hook_type, priority, handler);
                Ok(())
            }
        }
    }

    fn declared_priority(&self, hook_type: HookType) -> PluginResult<i32> {
        self.descriptor().hook_priority(hook_type).ok_or_else(|| {
            PluginError::permission(
                self.plugin_name(),
                format!("hook '{hook_type}' is not declared in the manifest"),
            )
        })
    }

    /// Registers route-scoped middleware; requires `router`.
    pub fn register_middleware(
        &self,
        name: &str,
        priority: i32,
        scope: RouteScope,
        middleware: Arc<dyn Middleware>,
    ) -> PluginResult<()> {
        let owner = self.plugin_name();
        if !self.inner.services.has(Capability::Router) {
            return Err(PluginError::permission(
                owner,
                "registering middleware requires the 'router' capability",
            ));
        }
        let registration = MiddlewareRegistration::new(name, priority, scope, middleware);
        let mut state = self.inner.staging.state.lock();
        match state.phase {
            Phase::Closed => Err(Staging::closed_error(owner)),
            Phase::Staging => {
                if state.middleware.iter().any(|m| m.name == name) {
                    return Err(PluginError::registration(
                        owner,
                        format!("middleware '{name}' is already registered"),
                    ));
                }
                debug!(plugin = %owner, middleware = %name, priority, "Middleware staged");
                state.middleware.push(registration);
                Ok(())
            }
            Phase::Live => self.inner.runtime.middleware.register(owner, registration),
        }
    }

    // --- Events ---

    /// Publishes `data` on `topic`.
    pub async fn publish_event(&self, topic: &str, data: serde_json::Value) -> PluginResult<DeliveryReport> {
        let name = self.plugin_name();
        if !self.descriptor().publishes.iter().any(|t| t == topic) {
            warn!(plugin = %name, topic = %topic, "Publishing on a topic not declared in the manifest");
        }
        self.inner.runtime.events.publish(name, topic, data).await
    }

    /// Subscribes `handler` to `topic`; removed automatically at cleanup.
    pub fn subscribe_event(&self, topic: &str, handler: Arc<dyn EventHandler>) -> PluginResult<SubscriptionId> {
        let name = self.plugin_name();
        // Held across the subscription so cleanup cannot withdraw in between.
        let state = self.inner.staging.state.lock();
        if state.phase == Phase::Closed {
            return Err(Staging::closed_error(name));
        }
        if !self.descriptor().subscribes.iter().any(|t| t == topic) {
            warn!(plugin = %name, topic = %topic, "Subscribing to a topic not declared in the manifest");
        }
        Ok(self.inner.runtime.events.subscribe(name, topic, handler))
    }

    /// Removes one of this plugin's subscriptions.
    pub fn unsubscribe_event(&self, id: SubscriptionId) -> bool {
        self.inner.runtime.events.unsubscribe_owned(self.plugin_name(), id)
    }

    // --- Services ---

    /// Exports `value` as `service`; the name must be listed in the manifest.
    pub fn export_service<T>(&self, service: &str, value: Arc<T>) -> PluginResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let name = self.plugin_name();
        if !self.descriptor().declares_export(service) {
            return Err(PluginError::permission(
                name,
                format!("service '{service}' is not listed in the manifest exports"),
            ));
        }
        let state = self.inner.staging.state.lock();
        if state.phase == Phase::Closed {
            return Err(Staging::closed_error(name));
        }
        self.inner.runtime.services.export(name, service, value);
        Ok(())
    }

    /// Imports `service` exported by `plugin`.
    pub fn import_service<T>(&self, plugin: &str, service: &str) -> PluginResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.runtime.services.import::<T>(plugin, service)
    }

    // --- Storage and tasks ---

    /// This plugin's storage namespace.
    pub fn storage(&self) -> PluginStorage {
        self.inner.storage.clone()
    }

    /// Starts a supervised background task.
    ///
    /// The task gets a token cancelled when the plugin stops; the manager
    /// waits for it, up to the stop timeout, before cleanup.
    pub fn spawn_task<F, Fut>(&self, name: &str, task: F) -> PluginResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        self.inner.tasks.spawn(name, task)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin_name())
            .field("services", &self.inner.services)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Staging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Staging")
            .field("phase", &state.phase)
            .field("hooks", &state.hooks.len())
            .field("middleware", &state.middleware.len())
            .finish()
    }
}

impl std::fmt::Debug for RuntimeHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandles").finish_non_exhaustive()
    }
}

