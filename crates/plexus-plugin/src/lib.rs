//! # plexus-plugin
//!
//! The Plexus extension runtime. Provides:
//!
//! - A plugin catalog populated explicitly by the host
//! - Dependency resolution and a lifecycle state machine with hot reload
//! - A capability gate that scopes host services per plugin
//! - Priority-ordered hooks and route-scoped middleware over swapped snapshots
//! - An event bus, a typed service registry, and per-plugin storage
//! - Supervision of plugin background tasks

#[macro_use]
mod macros;

pub mod api;
pub mod discovery;
pub mod error;
pub mod events;
pub mod handlers;
pub mod hooks;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod middleware;
pub mod permission;
pub mod prelude;
pub mod registry;
pub mod resolver;
pub mod services;
pub mod storage;
pub mod tasks;
pub mod traits;

mod safety;

pub use api::PluginContext;
pub use error::{PluginError, PluginResult};
pub use events::EventBus;
pub use hooks::{HookDispatcher, HookRegistry};
pub use lifecycle::PluginState;
pub use manager::{LifecycleReport, PluginManager, PluginStatus};
pub use manifest::{PluginDescriptor, PluginManifest};
pub use middleware::MiddlewareRegistry;
pub use permission::{HostPolicy, PermissionGate};
pub use registry::{PluginInfo, PluginRegistry};
pub use resolver::{DependencyResolver, Resolution};
pub use services::ServiceRegistry;
pub use traits::{Plugin, PluginFactory, factory};
