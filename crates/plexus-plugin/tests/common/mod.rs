//! Shared fixtures for the runtime integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use plexus_core::config::AppConfig;
use plexus_plugin::prelude::*;
use plexus_plugin::{PluginManager, PluginRegistry};

/// Ordered record of lifecycle callbacks across every test plugin.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Entries starting with `prefix`, in order.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

type Setup = Arc<dyn Fn(&PluginContext, usize) -> PluginResult<()> + Send + Sync>;

/// Switches a test flips to make lifecycle callbacks misbehave.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail_initialize: Arc<AtomicBool>,
    pub panic_initialize: Arc<AtomicBool>,
    pub fail_start: Arc<AtomicBool>,
    pub fail_cleanup: Arc<AtomicBool>,
    pub reject_config: Arc<AtomicBool>,
}

impl Faults {
    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }
}

/// Configurable plugin whose instances share a journal, fault switches and
/// a handle to the most recent context.
#[derive(Clone)]
pub struct TestPlugin {
    name: String,
    version: String,
    dependencies: Vec<DependencySpec>,
    permissions: PermissionSet,
    hooks: Vec<HookDeclaration>,
    events: EventDeclarations,
    exports: Vec<String>,
    schema: ConfigSchema,
    journal: Journal,
    pub faults: Faults,
    instances: Arc<AtomicUsize>,
    last_context: Arc<Mutex<Option<PluginContext>>>,
    setup: Option<Setup>,
    on_start: Option<Setup>,
    ctx: Option<PluginContext>,
    generation: usize,
}

impl TestPlugin {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            dependencies: Vec::new(),
            permissions: PermissionSet::default(),
            hooks: Vec::new(),
            events: EventDeclarations::default(),
            exports: Vec::new(),
            schema: ConfigSchema::default(),
            journal: journal.clone(),
            faults: Faults::default(),
            instances: Arc::new(AtomicUsize::new(0)),
            last_context: Arc::new(Mutex::new(None)),
            setup: None,
            on_start: None,
            ctx: None,
            generation: 0,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn depends_on(mut self, name: &str, constraint: &str) -> Self {
        self.dependencies.push(DependencySpec::required(name, constraint));
        self
    }

    pub fn optionally_depends_on(mut self, name: &str) -> Self {
        self.dependencies.push(DependencySpec::optional(name, "*"));
        self
    }

    pub fn grant(mut self, capabilities: &[Capability]) -> Self {
        self.permissions = PermissionSet::from_capabilities(capabilities);
        self
    }

    pub fn declares_hook(mut self, hook: HookType, priority: i32) -> Self {
        self.hooks.push(HookDeclaration::new(hook, priority));
        self
    }

    pub fn publishes(mut self, topic: &str) -> Self {
        self.events.publishes.push(topic.to_string());
        self
    }

    pub fn subscribes(mut self, topic: &str) -> Self {
        self.events.subscribes.push(topic.to_string());
        self
    }

    pub fn exports(mut self, service: &str) -> Self {
        self.exports.push(service.to_string());
        self
    }

    pub fn schema(mut self, schema: ConfigSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Runs during `initialize` with the context and the instance generation
    /// (1 for the first instance, 2 after the first reload, ...).
    pub fn on_initialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext, usize) -> PluginResult<()> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    /// Runs during `start`.
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext, usize) -> PluginResult<()> + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn factory(&self) -> PluginFactory {
        let template = self.clone();
        factory(move || template.clone())
    }

    /// Instances initialized so far.
    pub fn instances(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }

    /// Context handed to the most recently initialized instance.
    pub fn context(&self) -> PluginContext {
        self.last_context
            .lock()
            .clone()
            .expect("plugin has been initialized")
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependencies(&self) -> Vec<DependencySpec> {
        self.dependencies.clone()
    }

    fn permissions(&self) -> PermissionSet {
        self.permissions
    }

    fn hooks(&self) -> Vec<HookDeclaration> {
        self.hooks.clone()
    }

    fn events(&self) -> EventDeclarations {
        self.events.clone()
    }

    fn exports(&self) -> Vec<String> {
        self.exports.clone()
    }

    fn config_schema(&self) -> ConfigSchema {
        self.schema.clone()
    }

    async fn initialize(&mut self, ctx: PluginContext) -> PluginResult<()> {
        self.generation = self.instances.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.push(format!("initialize:{}", self.name));
        if self.faults.panic_initialize.load(Ordering::SeqCst) {
            panic!("{} exploded during initialize", self.name);
        }
        if self.faults.fail_initialize.load(Ordering::SeqCst) {
            return Err(PluginError::lifecycle(&self.name, "initialize refused"));
        }
        if let Some(setup) = &self.setup {
            setup(&ctx, self.generation)?;
        }
        *self.last_context.lock() = Some(ctx.clone());
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn start(&mut self) -> PluginResult<()> {
        self.journal.push(format!("start:{}", self.name));
        if self.faults.fail_start.load(Ordering::SeqCst) {
            return Err(PluginError::lifecycle(&self.name, "start refused"));
        }
        if let (Some(hook), Some(ctx)) = (&self.on_start, &self.ctx) {
            hook(ctx, self.generation)?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> PluginResult<()> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }

    async fn cleanup(&mut self) -> PluginResult<()> {
        self.journal.push(format!("cleanup:{}", self.name));
        if self.faults.fail_cleanup.load(Ordering::SeqCst) {
            return Err(PluginError::lifecycle(&self.name, "cleanup refused"));
        }
        Ok(())
    }

    async fn on_config_change(&mut self, config: &Value) -> PluginResult<()> {
        self.journal.push(format!("config:{}:{config}", self.name));
        if self.faults.reject_config.load(Ordering::SeqCst) {
            return Err(PluginError::InvalidConfig {
                plugin: self.name.clone(),
                message: "rejected by plugin".to_string(),
            });
        }
        Ok(())
    }
}

/// Config with short timeouts so misbehaving plugins fail fast.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.runtime.lifecycle_timeout_seconds = 5;
    config.runtime.hook_timeout_seconds = 2;
    config.runtime.stop_timeout_seconds = 1;
    config
}

/// Registers `plugins` and builds a manager over them.
pub async fn manager_with(plugins: &[&TestPlugin]) -> PluginManager {
    manager_with_config(plugins, &test_config()).await
}

pub async fn manager_with_config(plugins: &[&TestPlugin], config: &AppConfig) -> PluginManager {
    let catalog = Arc::new(PluginRegistry::new());
    for plugin in plugins {
        catalog
            .register(plugin.name(), plugin.factory())
            .await
            .expect("plugin registers");
    }
    PluginManager::new(catalog, config).expect("manager builds")
}

/// Hook handler that journals its invocation and stamps `<plugin>:<priority>`
/// with `generation` into the payload.
pub fn stamping_hook(journal: &Journal, plugin: &str, priority: i32, generation: usize) -> Arc<dyn HookHandler> {
    let journal = journal.clone();
    let key = format!("{plugin}:{priority}");
    hook_fn(move |_payload: HookPayload| {
        let journal = journal.clone();
        let key = key.clone();
        async move {
            journal.push(format!("hook:{key}"));
            let mut mods = std::collections::HashMap::new();
            mods.insert(key, json!(generation));
            Ok(HookAction::ContinueWith(mods))
        }
    })
}
