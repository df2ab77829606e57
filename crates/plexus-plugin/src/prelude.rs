//! Prelude for plugin authors.

pub use async_trait::async_trait;
pub use serde_json::{Value, json};
pub use tokio_util::sync::CancellationToken;

pub use plexus_core::{Capability, CapabilitySet};

pub use crate::api::{
    CacheService, ConfigurationService, DatabaseService, FilesystemService, MetricsService,
    NetworkService, PluginContext, ProcessService, RouterService,
};
pub use crate::error::{PluginError, PluginResult};
pub use crate::events::{Event, EventHandler};
pub use crate::handlers::{endpoint_fn, event_fn, hook_fn, middleware_fn};
pub use crate::hooks::{HookAction, HookHandler, HookPayload, HookType};
pub use crate::manifest::{
    ConfigField, ConfigFieldType, ConfigSchema, DependencySpec, EventDeclarations,
    HookDeclaration, PermissionSet,
};
pub use crate::middleware::{
    Endpoint, Middleware, MiddlewareRequest, MiddlewareResponse, Next, RouteScope,
};
pub use crate::storage::PluginStorage;
pub use crate::traits::{Plugin, PluginFactory, factory};

pub use crate::{config_schema, hook_payload};
