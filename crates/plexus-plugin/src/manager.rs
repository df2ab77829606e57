//! Plugin manager: drives every plugin through its lifecycle.
//!
//! The manager owns the shared registries (hooks, middleware, events,
//! services, storage) and is the only component that moves plugins between
//! [`PluginState`]s. Each plugin has a slot whose async mutex serialises its
//! lifecycle operations; state reads never wait on a running operation.
//!
//! Failure policy:
//! - a missing or unready dependency rejects the load and leaves the plugin
//!   where it was;
//! - any other load, initialize or start failure marks the plugin `Failed`
//!   and every plugin that transitively requires it `Failed` as well;
//! - a failed reload marks only the reloaded plugin `Failed`. Reload is
//!   destructive: the old instance is already gone and is not restored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use plexus_core::config::AppConfig;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::api::HostServices;
use crate::api::context::{PluginContext, RuntimeHandles, Staging};
use crate::error::{PluginError, PluginResult};
use crate::events::{AsyncDelivery, EventBus, RUNTIME_SOURCE, lifecycle_topic};
use crate::hooks::{HookDispatcher, HookRegistry};
use crate::lifecycle::PluginState;
use crate::manifest::PluginDescriptor;
use crate::middleware::MiddlewareRegistry;
use crate::permission::{HostPolicy, PermissionGate};
use crate::registry::PluginRegistry;
use crate::resolver::{DependencyResolver, Resolution};
use crate::safety::guard_lifecycle;
use crate::services::ServiceRegistry;
use crate::storage::{MemoryStorageBackend, PluginStorage, StorageBackend};
use crate::tasks::TaskSupervisor;
use crate::traits::Plugin;

/// Outcome of a bulk lifecycle operation.
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    /// Plugins the operation succeeded for, in the order processed.
    pub succeeded: Vec<String>,
    /// Plugins it failed for, with the error.
    pub failed: Vec<(String, PluginError)>,
    /// Plugins not in a state the operation applies to.
    pub skipped: Vec<String>,
}

impl LifecycleReport {
    /// Returns whether nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, name: &str, result: PluginResult<()>) {
        match result {
            Ok(()) => self.succeeded.push(name.to_string()),
            Err(err) => self.failed.push((name.to_string(), err)),
        }
    }

    fn merge(&mut self, other: LifecycleReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }
}

/// Admin view of one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatus {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Plugin description.
    pub description: String,
    /// Current lifecycle state.
    pub state: PluginState,
    /// The error behind the last failure, if any.
    pub last_error: Option<String>,
    /// Successful reloads.
    pub reload_count: u32,
    /// When the current state was entered.
    pub since: DateTime<Utc>,
}

struct SlotStatus {
    state: PluginState,
    last_error: Option<PluginError>,
    reload_count: u32,
    since: DateTime<Utc>,
    /// Last validated configuration, reused by reload.
    config: Option<Value>,
}

/// A live plugin instance and everything it owns.
struct LiveInstance {
    plugin: Box<dyn Plugin>,
    staging: Arc<Staging>,
    tasks: Arc<TaskSupervisor>,
    storage: PluginStorage,
    config: Arc<RwLock<Value>>,
    span: Span,
}

struct Slot {
    name: String,
    status: RwLock<SlotStatus>,
    live: tokio::sync::Mutex<Option<LiveInstance>>,
}

impl Slot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: RwLock::new(SlotStatus {
                state: PluginState::Unloaded,
                last_error: None,
                reload_count: 0,
                since: Utc::now(),
                config: None,
            }),
            live: tokio::sync::Mutex::new(None),
        }
    }

    fn state(&self) -> PluginState {
        self.status.read().state
    }
}

/// Orchestrates plugin lifecycles over the shared registries.
pub struct PluginManager {
    catalog: Arc<PluginRegistry>,
    slots: DashMap<String, Arc<Slot>>,
    hooks: Arc<HookRegistry>,
    dispatcher: Arc<HookDispatcher>,
    middleware: Arc<MiddlewareRegistry>,
    events: Arc<EventBus>,
    services: Arc<ServiceRegistry>,
    storage: Arc<dyn StorageBackend>,
    gate: PermissionGate,
    host: HostServices,
    settings: HashMap<String, Value>,
    framework_version: Version,
    lifecycle_timeout: Duration,
    stop_timeout: Duration,
}

impl PluginManager {
    /// Creates a manager over `catalog` configured from `config`.
    ///
    /// Must be called within a tokio runtime when `config.events` names
    /// asynchronous topics, since their workers are spawned here.
    pub fn new(catalog: Arc<PluginRegistry>, config: &AppConfig) -> PluginResult<Self> {
        let framework_version = Version::parse(&config.runtime.framework_version).map_err(|e| {
            PluginError::InvalidConfig {
                plugin: RUNTIME_SOURCE.to_string(),
                message: format!(
                    "invalid framework_version '{}': {e}",
                    config.runtime.framework_version
                ),
            }
        })?;

        let hooks = Arc::new(HookRegistry::new());
        let dispatcher = Arc::new(HookDispatcher::new(
            Arc::clone(&hooks),
            config.runtime.hook_timeout(),
        ));
        let middleware = Arc::new(MiddlewareRegistry::new(
            config.runtime.route_cache_capacity,
            config.runtime.hook_timeout(),
        ));
        let events = Arc::new(EventBus::new(Duration::from_secs(
            config.events.handler_timeout_seconds,
        )));
        for topic in &config.events.async_topics {
            events.enable_async(&topic.topic, AsyncDelivery::from(topic));
        }

        info!(
            framework = %framework_version,
            denied = ?config.plugins.denied_capabilities,
            "Plugin manager created"
        );

        Ok(Self {
            catalog,
            slots: DashMap::new(),
            hooks,
            dispatcher,
            middleware,
            events,
            services: Arc::new(ServiceRegistry::new()),
            storage: Arc::new(MemoryStorageBackend::new()),
            gate: PermissionGate::new(HostPolicy::denying(&config.plugins.denied_capabilities)),
            host: HostServices::default(),
            settings: config.plugins.settings.clone(),
            framework_version,
            lifecycle_timeout: config.runtime.lifecycle_timeout(),
            stop_timeout: config.runtime.stop_timeout(),
        })
    }

    /// Sets the host capability services offered to plugins.
    pub fn with_host_services(mut self, host: HostServices) -> Self {
        self.host = host;
        self
    }

    /// Sets the storage backend behind every plugin namespace.
    pub fn with_storage_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.storage = backend;
        self
    }

    // --- Accessors ---

    /// The plugin catalog.
    pub fn catalog(&self) -> &Arc<PluginRegistry> {
        &self.catalog
    }

    /// The hook registry.
    pub fn hook_registry(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// The hook dispatcher used by the request pipeline.
    pub fn dispatcher(&self) -> &Arc<HookDispatcher> {
        &self.dispatcher
    }

    /// The middleware registry.
    pub fn middleware(&self) -> &Arc<MiddlewareRegistry> {
        &self.middleware
    }

    /// The event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The service registry.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// The storage backend.
    pub fn storage_backend(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// The permission gate.
    pub fn permission_gate(&self) -> &PermissionGate {
        &self.gate
    }

    // --- Queries ---

    /// Current state of `name`; unknown plugins read as `Unloaded`.
    pub fn state(&self, name: &str) -> PluginState {
        self.slots
            .get(name)
            .map(|slot| slot.state())
            .unwrap_or(PluginState::Unloaded)
    }

    /// Last recorded failure of `name`.
    pub fn last_error(&self, name: &str) -> Option<PluginError> {
        self.slots
            .get(name)
            .and_then(|slot| slot.status.read().last_error.clone())
    }

    /// Admin view of `name`.
    pub async fn status(&self, name: &str) -> Option<PluginStatus> {
        let descriptor = self.catalog.descriptor(name).await?;
        Some(self.status_of(&descriptor))
    }

    /// Admin view of every registered plugin, in registration order.
    pub async fn list_plugins(&self) -> Vec<PluginStatus> {
        self.catalog
            .descriptors()
            .await
            .iter()
            .map(|d| self.status_of(d))
            .collect()
    }

    /// Resolves the initialization order of the whole catalog.
    pub async fn resolve_order(&self) -> PluginResult<Resolution> {
        DependencyResolver::resolve(&self.catalog.descriptors().await)
    }

    fn status_of(&self, descriptor: &PluginDescriptor) -> PluginStatus {
        let slot = self.slots.get(&descriptor.name).map(|s| Arc::clone(s.value()));
        let (state, last_error, reload_count, since) = match slot {
            Some(slot) => {
                let status = slot.status.read();
                (
                    status.state,
                    status.last_error.as_ref().map(ToString::to_string),
                    status.reload_count,
                    status.since,
                )
            }
            None => (PluginState::Unloaded, None, 0, Utc::now()),
        };
        PluginStatus {
            name: descriptor.name.clone(),
            version: descriptor.version.to_string(),
            description: descriptor.description.clone(),
            state,
            last_error,
            reload_count,
            since,
        }
    }

    // --- Single-plugin lifecycle ---

    /// Instantiates and initializes `name`.
    ///
    /// `config` overrides the host settings for this plugin. Dependency
    /// errors leave the plugin's state untouched; every other failure marks
    /// it and its dependents `Failed`.
    pub async fn load_plugin(&self, name: &str, config: Option<Value>) -> PluginResult<()> {
        let descriptor = self.descriptor(name).await?;
        let slot = self.slot(name);
        let result = {
            let mut live = slot.live.lock().await;
            if live.is_some() {
                return Err(PluginError::lifecycle(name, "already loaded"));
            }
            slot.state().check(name, PluginState::Initializing)?;
            self.check_dependencies(&descriptor).await?;
            self.initialize_instance(&slot, &mut live, &descriptor, config).await
        };

        match result {
            Ok(()) => {
                self.notify(name, "initialized", None).await;
                Ok(())
            }
            Err(err) => {
                self.fail(&slot, err.clone(), true).await;
                Err(err)
            }
        }
    }

    /// Starts an initialized plugin and publishes its staged registrations.
    ///
    /// Every required dependency must already be `Started`; otherwise the
    /// plugin stays `Initialized` and `DependencyNotReady` is returned.
    pub async fn start_plugin(&self, name: &str) -> PluginResult<()> {
        let descriptor = self.descriptor(name).await?;
        let slot = self.slot(name);
        let result = {
            let mut live = slot.live.lock().await;
            slot.state().check(name, PluginState::Starting)?;
            self.check_started_dependencies(&descriptor)?;
            self.start_instance(&slot, &mut live).await
        };

        match result {
            Ok(()) => {
                self.notify(name, "started", None).await;
                Ok(())
            }
            Err(err) => {
                self.fail(&slot, err.clone(), true).await;
                Err(err)
            }
        }
    }

    /// Stops a started plugin: withdraws its hooks and middleware, joins its
    /// background tasks, then calls `stop`.
    pub async fn stop_plugin(&self, name: &str) -> PluginResult<()> {
        let slot = self.known_slot(name).await?;
        let result = {
            let mut live = slot.live.lock().await;
            slot.state().check(name, PluginState::Stopping)?;
            self.stop_instance(&slot, &mut live).await
        };

        match result {
            Ok(()) => {
                self.notify(name, "stopped", None).await;
                Ok(())
            }
            Err(err) => {
                self.fail(&slot, err.clone(), false).await;
                Err(err)
            }
        }
    }

    /// Cleans up a plugin: calls `cleanup`, releases every registration it
    /// owns, revokes its storage handle and drops the instance.
    pub async fn cleanup_plugin(&self, name: &str) -> PluginResult<()> {
        let slot = self.known_slot(name).await?;
        let result = {
            let mut live = slot.live.lock().await;
            slot.state().check(name, PluginState::Cleaning)?;
            self.cleanup_instance(&slot, &mut live)
                .await
                .and_then(|()| self.transition(&slot, PluginState::Unloaded))
        };

        match result {
            Ok(()) => {
                self.notify(name, "unloaded", None).await;
                Ok(())
            }
            Err(err) => {
                self.fail(&slot, err.clone(), false).await;
                Err(err)
            }
        }
    }

    /// Stops `name` if started, then cleans it up.
    pub async fn unload_plugin(&self, name: &str) -> PluginResult<()> {
        if self.state(name) == PluginState::Started {
            if let Err(err) = self.stop_plugin(name).await {
                warn!(plugin = %name, error = %err, "Stop failed during unload, cleaning up anyway");
            }
        }
        self.cleanup_plugin(name).await
    }

    /// Replaces the running instance of `name` with a fresh one.
    ///
    /// The old instance is stopped and cleaned up first and every
    /// registration it owned is released; the new instance is then
    /// initialized and started and its registrations published in one batch
    /// per registry. Storage contents survive. On failure the plugin is left
    /// `Failed` and the error is wrapped in [`PluginError::Reload`].
    ///
    /// Reload is destructive: between the two instances the plugin has no
    /// hooks, middleware, subscriptions or services registered. A concurrent
    /// dispatch sees one complete instance's registrations or none of them.
    pub async fn reload_plugin(&self, name: &str, config: Option<Value>) -> PluginResult<()> {
        let descriptor = self.descriptor(name).await?;
        let slot = self.slot(name);
        let result = {
            let mut live = slot.live.lock().await;
            if live.is_none() && slot.state() != PluginState::Failed {
                return Err(PluginError::lifecycle(name, "cannot reload a plugin that is not loaded"));
            }
            self.reload_instance(&slot, &mut live, &descriptor, config).await
        };

        match result {
            Ok(()) => {
                self.notify(name, "reloaded", None).await;
                Ok(())
            }
            Err(err) => {
                let err = PluginError::Reload {
                    plugin: name.to_string(),
                    source: Box::new(err),
                };
                self.fail(&slot, err.clone(), false).await;
                Err(err)
            }
        }
    }

    /// Validates `config` against the schema and hands it to the plugin.
    ///
    /// If `on_config_change` fails the previous configuration is restored.
    pub async fn update_config(&self, name: &str, config: Value) -> PluginResult<()> {
        let descriptor = self.descriptor(name).await?;
        let slot = self.slot(name);
        let mut live = slot.live.lock().await;
        let instance = live
            .as_mut()
            .ok_or_else(|| PluginError::lifecycle(name, "cannot reconfigure a plugin that is not loaded"))?;

        let validated = descriptor.config_schema.validate(name, Some(&config))?;
        let previous = std::mem::replace(&mut *instance.config.write(), validated.clone());
        let span = instance.span.clone();
        let outcome = guard_lifecycle(
            name,
            "on_config_change",
            self.lifecycle_timeout,
            instance.plugin.on_config_change(&validated),
        )
        .instrument(span)
        .await;

        match outcome {
            Ok(()) => {
                slot.status.write().config = Some(validated);
                info!(plugin = %name, "Plugin configuration updated");
                Ok(())
            }
            Err(err) => {
                *instance.config.write() = previous;
                warn!(plugin = %name, error = %err, "Configuration change rejected");
                Err(err)
            }
        }
    }

    // --- Bulk lifecycle ---

    /// Loads every plugin in dependency order, skipping `Failed` ones.
    ///
    /// Fails only when the dependency graph has a cycle.
    pub async fn initialize_all(&self) -> PluginResult<LifecycleReport> {
        let resolution = self.resolve_order().await?;
        let mut report = LifecycleReport::default();

        for (name, err) in resolution.excluded {
            warn!(plugin = %name, error = %err, "Plugin excluded by dependency resolution");
            self.slot(&name).status.write().last_error = Some(err.clone());
            report.failed.push((name, err));
        }

        for name in resolution.order {
            match self.state(&name) {
                PluginState::Unloaded => {
                    let result = self.load_plugin(&name, None).await;
                    report.record(&name, result);
                }
                _ => report.skipped.push(name),
            }
        }
        info!(
            initialized = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Initialization pass complete"
        );
        Ok(report)
    }

    /// Starts every initialized plugin in dependency order.
    pub async fn start_all(&self) -> PluginResult<LifecycleReport> {
        let resolution = self.resolve_order().await?;
        let mut report = LifecycleReport::default();

        for name in resolution.order {
            match self.state(&name) {
                PluginState::Initialized => {
                    let result = self.start_plugin(&name).await;
                    report.record(&name, result);
                }
                _ => report.skipped.push(name),
            }
        }
        info!(
            started = report.succeeded.len(),
            failed = report.failed.len(),
            "Start pass complete"
        );
        Ok(report)
    }

    /// Stops every started plugin in reverse dependency order.
    pub async fn stop_all(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for name in self.teardown_order().await {
            match self.state(&name) {
                PluginState::Started => {
                    let result = self.stop_plugin(&name).await;
                    report.record(&name, result);
                }
                _ => report.skipped.push(name),
            }
        }
        info!(stopped = report.succeeded.len(), failed = report.failed.len(), "Stop pass complete");
        report
    }

    /// Cleans up every loaded or failed plugin in reverse dependency order.
    pub async fn cleanup_all(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for name in self.teardown_order().await {
            match self.state(&name) {
                PluginState::Initialized | PluginState::Stopped | PluginState::Failed => {
                    let result = self.cleanup_plugin(&name).await;
                    report.record(&name, result);
                }
                _ => report.skipped.push(name),
            }
        }
        info!(cleaned = report.succeeded.len(), failed = report.failed.len(), "Cleanup pass complete");
        report
    }

    /// Stops and cleans up everything, then shuts the event bus down.
    pub async fn shutdown(&self) -> LifecycleReport {
        let mut report = self.stop_all().await;
        report.merge(self.cleanup_all().await);
        self.events.shutdown(self.stop_timeout).await;
        info!("Plugin manager shut down");
        report
    }

    // --- Internals ---

    async fn descriptor(&self, name: &str) -> PluginResult<Arc<PluginDescriptor>> {
        self.catalog
            .descriptor(name)
            .await
            .ok_or_else(|| PluginError::UnknownPlugin {
                plugin: name.to_string(),
            })
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        Arc::clone(
            self.slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Slot::new(name)))
                .value(),
        )
    }

    async fn known_slot(&self, name: &str) -> PluginResult<Arc<Slot>> {
        self.descriptor(name).await?;
        Ok(self.slot(name))
    }

    /// Resolution order followed by anything it left out, reversed.
    async fn teardown_order(&self) -> Vec<String> {
        let descriptors = self.catalog.descriptors().await;
        let mut order = DependencyResolver::resolve(&descriptors)
            .map(|r| r.order)
            .unwrap_or_default();
        for d in &descriptors {
            if !order.contains(&d.name) {
                order.push(d.name.clone());
            }
        }
        order.reverse();
        order
    }

    fn transition(&self, slot: &Slot, next: PluginState) -> PluginResult<()> {
        let mut status = slot.status.write();
        status.state.check(&slot.name, next)?;
        debug!(plugin = %slot.name, from = %status.state, to = %next, "State transition");
        status.state = next;
        status.since = Utc::now();
        if next == PluginState::Initializing {
            status.last_error = None;
        }
        Ok(())
    }

    fn mark_failed(&self, slot: &Slot, err: PluginError) {
        error!(plugin = %slot.name, error = %err, "Plugin failed");
        let mut status = slot.status.write();
        status.state = PluginState::Failed;
        status.since = Utc::now();
        status.last_error = Some(err);
    }

    async fn fail(&self, slot: &Slot, err: PluginError, cascade: bool) {
        self.mark_failed(slot, err.clone());
        self.notify(&slot.name, "failed", Some(&err)).await;
        if cascade {
            self.cascade_failure(&slot.name).await;
        }
    }

    /// Marks every transitive required dependent of `name` `Failed` and tears
    /// down whatever it was running.
    ///
    /// A live dependent has its context closed, its background tasks joined
    /// and its registrations withdrawn; one that was `Started` also gets its
    /// `stop` callback. The instance itself stays in the slot for `cleanup`.
    async fn cascade_failure(&self, name: &str) {
        let descriptors = self.catalog.descriptors().await;
        for dependent in DependencyResolver::dependents_of(&descriptors, name) {
            let slot = self.slot(&dependent);
            let err = PluginError::DependencyFailed {
                plugin: dependent.clone(),
                dependency: name.to_string(),
            };
            {
                let mut live = slot.live.lock().await;
                let previous = slot.state();
                if previous == PluginState::Failed {
                    continue;
                }
                self.mark_failed(&slot, err.clone());
                match live.as_mut() {
                    Some(instance) => {
                        self.release(&dependent, instance).await;
                        if previous == PluginState::Started {
                            self.stop_callback(&dependent, instance).await;
                        }
                    }
                    None => self.withdraw(&dependent),
                }
            }
            self.notify(&dependent, "failed", Some(&err)).await;
        }
    }

    /// Runs `stop` on an instance already torn down by [`Self::release`].
    async fn stop_callback(&self, name: &str, instance: &mut LiveInstance) {
        let span = instance.span.clone();
        let outcome = guard_lifecycle(name, "stop", self.lifecycle_timeout, instance.plugin.stop())
            .instrument(span)
            .await;
        if let Err(err) = outcome {
            warn!(plugin = %name, error = %err, "Stop failed while cascading a dependency failure");
        }
    }

    async fn notify(&self, name: &str, transition: &str, err: Option<&PluginError>) {
        let data = json!({
            "plugin": name,
            "state": self.state(name),
            "error": err.map(ToString::to_string),
        });
        if let Err(e) = self
            .events
            .publish(RUNTIME_SOURCE, &lifecycle_topic(transition), data)
            .await
        {
            debug!(plugin = %name, transition = %transition, error = %e, "Lifecycle event not delivered");
        }
    }

    async fn check_dependencies(&self, descriptor: &PluginDescriptor) -> PluginResult<()> {
        for dep in &descriptor.dependencies {
            let Some(target) = self.catalog.descriptor(&dep.name).await else {
                if dep.optional {
                    debug!(plugin = %descriptor.name, dependency = %dep.name, "Optional dependency absent");
                    continue;
                }
                return Err(PluginError::MissingDependency {
                    plugin: descriptor.name.clone(),
                    dependency: dep.name.clone(),
                });
            };
            if !dep.constraint.matches(&target.version) {
                if dep.optional {
                    continue;
                }
                return Err(PluginError::IncompatibleDependency {
                    plugin: descriptor.name.clone(),
                    dependency: dep.name.clone(),
                    required: dep.constraint.to_string(),
                    found: target.version.to_string(),
                });
            }
            let state = self.state(&dep.name);
            if !state.satisfies_dependents() {
                if dep.optional {
                    debug!(plugin = %descriptor.name, dependency = %dep.name, %state, "Optional dependency not ready");
                    continue;
                }
                return Err(PluginError::DependencyNotReady {
                    plugin: descriptor.name.clone(),
                    dependency: dep.name.clone(),
                    state,
                });
            }
        }
        Ok(())
    }

    /// Required dependencies must be `Started` before a dependent starts.
    fn check_started_dependencies(&self, descriptor: &PluginDescriptor) -> PluginResult<()> {
        for dep in descriptor.dependencies.iter().filter(|d| !d.optional) {
            let state = self.state(&dep.name);
            if state != PluginState::Started {
                return Err(PluginError::DependencyNotReady {
                    plugin: descriptor.name.clone(),
                    dependency: dep.name.clone(),
                    state,
                });
            }
        }
        Ok(())
    }

    fn runtime_handles(&self) -> RuntimeHandles {
        RuntimeHandles {
            hooks: Arc::clone(&self.hooks),
            middleware: Arc::clone(&self.middleware),
            events: Arc::clone(&self.events),
            services: Arc::clone(&self.services),
        }
    }

    /// Removes every runtime registration owned by `name`.
    fn withdraw(&self, name: &str) {
        let hooks = self.hooks.unregister_plugin(name);
        let middleware = self.middleware.unregister_plugin(name);
        let subscriptions = self.events.unsubscribe_plugin(name);
        let services = self.services.remove_plugin(name);
        if hooks + middleware + subscriptions + services > 0 {
            info!(plugin = %name, hooks, middleware, subscriptions, services, "Registrations released");
        }
    }

    /// Stops the instance's tasks and withdraws its registrations.
    async fn release(&self, name: &str, instance: &LiveInstance) {
        instance.staging.close();
        let tasks = instance.tasks.shutdown(self.stop_timeout).await;
        if !tasks.aborted.is_empty() {
            warn!(plugin = %name, aborted = ?tasks.aborted, "Background tasks aborted");
        }
        self.withdraw(name);
    }

    /// `Initializing` → `Initialized`. The instance stays in the slot even on
    /// failure so `cleanup` can still be called on it.
    async fn initialize_instance(
        &self,
        slot: &Slot,
        live: &mut Option<LiveInstance>,
        descriptor: &Arc<PluginDescriptor>,
        config: Option<Value>,
    ) -> PluginResult<()> {
        let name = descriptor.name.as_str();
        self.transition(slot, PluginState::Initializing)?;

        descriptor.check_framework(&self.framework_version)?;
        let granted = self.gate.validate(descriptor)?;
        let raw = config
            .or_else(|| slot.status.read().config.clone())
            .or_else(|| self.settings.get(name).cloned());
        let validated = descriptor.config_schema.validate(name, raw.as_ref())?;
        slot.status.write().config = Some(validated.clone());

        let plugin = self.catalog.instantiate(name).await?;
        let staging = Arc::new(Staging::new());
        let tasks = Arc::new(TaskSupervisor::new(name));
        let storage = PluginStorage::new(name, Arc::clone(&self.storage));
        let config = Arc::new(RwLock::new(validated));
        let ctx = PluginContext::new(
            Arc::clone(descriptor),
            Arc::clone(&config),
            self.gate.scope(name, granted, &self.host),
            self.runtime_handles(),
            storage.clone(),
            Arc::clone(&tasks),
            Arc::clone(&staging),
        );
        let span = ctx.span().clone();

        let instance = live.insert(LiveInstance {
            plugin,
            staging,
            tasks,
            storage,
            config,
            span: span.clone(),
        });
        let outcome = guard_lifecycle(
            name,
            "initialize",
            self.lifecycle_timeout,
            instance.plugin.initialize(ctx),
        )
        .instrument(span)
        .await;
        if let Err(err) = outcome {
            self.release(name, instance).await;
            return Err(err);
        }

        self.transition(slot, PluginState::Initialized)?;
        info!(plugin = %name, version = %descriptor.version, "Plugin initialized");
        Ok(())
    }

    /// `Initialized` → `Started`, publishing staged registrations.
    async fn start_instance(&self, slot: &Slot, live: &mut Option<LiveInstance>) -> PluginResult<()> {
        let name = slot.name.as_str();
        let instance = live
            .as_mut()
            .ok_or_else(|| PluginError::lifecycle(name, "no live instance"))?;
        self.transition(slot, PluginState::Starting)?;

        let span = instance.span.clone();
        let outcome = guard_lifecycle(name, "start", self.lifecycle_timeout, instance.plugin.start())
            .instrument(span)
            .await
            .and_then(|()| instance.staging.publish(name, &self.hooks, &self.middleware));

        match outcome {
            Ok((hooks, middleware)) => {
                self.transition(slot, PluginState::Started)?;
                info!(plugin = %name, hooks, middleware, "Plugin started");
                Ok(())
            }
            Err(err) => {
                self.release(name, instance).await;
                Err(err)
            }
        }
    }

    /// `Started` → `Stopped`.
    async fn stop_instance(&self, slot: &Slot, live: &mut Option<LiveInstance>) -> PluginResult<()> {
        let name = slot.name.as_str();
        let instance = live
            .as_mut()
            .ok_or_else(|| PluginError::lifecycle(name, "no live instance"))?;
        self.transition(slot, PluginState::Stopping)?;

        instance.staging.close();
        self.hooks.unregister_plugin(name);
        self.middleware.unregister_plugin(name);

        let tasks = instance.tasks.shutdown(self.stop_timeout).await;
        if !tasks.aborted.is_empty() {
            warn!(plugin = %name, aborted = ?tasks.aborted, "Background tasks aborted during stop");
        }

        let span = instance.span.clone();
        guard_lifecycle(name, "stop", self.lifecycle_timeout, instance.plugin.stop())
            .instrument(span)
            .await?;

        self.transition(slot, PluginState::Stopped)?;
        info!(plugin = %name, joined = tasks.joined, "Plugin stopped");
        Ok(())
    }

    /// Enters `Cleaning` and tears the instance down.
    ///
    /// Registrations are released and storage revoked even when the
    /// `cleanup` callback fails. Leaves the slot in `Cleaning`.
    async fn cleanup_instance(&self, slot: &Slot, live: &mut Option<LiveInstance>) -> PluginResult<()> {
        let name = slot.name.as_str();
        self.transition(slot, PluginState::Cleaning)?;

        let Some(mut instance) = live.take() else {
            self.withdraw(name);
            return Ok(());
        };

        instance.staging.close();
        let tasks = instance.tasks.shutdown(self.stop_timeout).await;
        if !tasks.aborted.is_empty() {
            warn!(plugin = %name, aborted = ?tasks.aborted, "Background tasks aborted during cleanup");
        }

        let span = instance.span.clone();
        let outcome = guard_lifecycle(name, "cleanup", self.lifecycle_timeout, instance.plugin.cleanup())
            .instrument(span)
            .await;

        self.withdraw(name);
        instance.storage.revoke();
        drop(instance);

        if outcome.is_ok() {
            info!(plugin = %name, "Plugin cleaned up");
        }
        outcome
    }

    async fn reload_instance(
        &self,
        slot: &Slot,
        live: &mut Option<LiveInstance>,
        descriptor: &Arc<PluginDescriptor>,
        config: Option<Value>,
    ) -> PluginResult<()> {
        let name = slot.name.as_str();
        info!(plugin = %name, from = %slot.state(), "Reloading plugin");

        if slot.state() == PluginState::Started {
            if let Err(err) = self.stop_instance(slot, live).await {
                warn!(plugin = %name, error = %err, "Stop failed during reload, tearing down anyway");
                self.mark_failed(slot, err);
            }
        }
        if matches!(
            slot.state(),
            PluginState::Initialized | PluginState::Stopped | PluginState::Failed
        ) {
            if let Err(err) = self.cleanup_instance(slot, live).await {
                warn!(plugin = %name, error = %err, "Cleanup failed during reload, continuing");
                self.mark_failed(slot, err);
            }
        }

        self.check_dependencies(descriptor).await?;
        self.check_started_dependencies(descriptor)?;
        self.initialize_instance(slot, live, descriptor, config).await?;
        self.start_instance(slot, live).await?;

        let count = {
            let mut status = slot.status.write();
            status.reload_count += 1;
            status.reload_count
        };
        info!(plugin = %name, reloads = count, "Plugin reloaded");
        Ok(())
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("framework_version", &self.framework_version.to_string())
            .field("plugins", &self.slots.len())
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}
