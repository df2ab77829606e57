//! Error type for the extension runtime.
//!
//! Every failure the runtime can surface is a [`PluginError`] variant that
//! names the extension it is attributable to. Each variant maps onto one
//! [`ErrorKind`] so the host can convert it into an
//! [`AppError`](plexus_core::AppError) at its boundary.

use plexus_core::error::{AppError, ErrorKind};
use thiserror::Error;

use crate::lifecycle::PluginState;

/// Result alias used throughout the runtime and by extension callbacks.
pub type PluginResult<T> = Result<T, PluginError>;

/// Unified error type for all runtime operations.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    // --- Manifest errors ---
    /// The manifest or descriptor is malformed.
    #[error("Invalid manifest for '{plugin}': {message}")]
    Manifest {
        /// Plugin the manifest belongs to.
        plugin: String,
        /// What is wrong.
        message: String,
    },

    /// Plugin configuration does not match its schema.
    #[error("Invalid configuration for '{plugin}': {message}")]
    InvalidConfig {
        /// Plugin being configured.
        plugin: String,
        /// What is wrong.
        message: String,
    },

    /// The plugin is not present in the catalog.
    #[error("Plugin '{plugin}' is not registered")]
    UnknownPlugin {
        /// The requested name.
        plugin: String,
    },

    // --- Dependency errors ---
    /// The dependency graph contains a cycle.
    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// The plugins forming the cycle, first repeated at the end.
        cycle: Vec<String>,
    },

    /// A required dependency is not registered.
    #[error("Plugin '{plugin}' requires '{dependency}', which is not registered")]
    MissingDependency {
        /// The dependent.
        plugin: String,
        /// The absent dependency.
        dependency: String,
    },

    /// A required dependency is registered with a version outside the constraint.
    #[error("Plugin '{plugin}' requires '{dependency}' {required}, found {found}")]
    IncompatibleDependency {
        /// The dependent.
        plugin: String,
        /// The dependency.
        dependency: String,
        /// Declared constraint.
        required: String,
        /// Registered version.
        found: String,
    },

    /// A required dependency exists but has not been initialized.
    #[error("Plugin '{plugin}' requires '{dependency}', which is {state}")]
    DependencyNotReady {
        /// The dependent.
        plugin: String,
        /// The dependency.
        dependency: String,
        /// The dependency's current state.
        state: PluginState,
    },

    /// A required dependency failed, taking this plugin down with it.
    #[error("Plugin '{plugin}' failed because its dependency '{dependency}' failed")]
    DependencyFailed {
        /// The dependent.
        plugin: String,
        /// The failed dependency.
        dependency: String,
    },

    // --- Permission errors ---
    /// A capability or registration right was not granted.
    #[error("Permission denied for '{plugin}': {message}")]
    Permission {
        /// The plugin that was refused.
        plugin: String,
        /// What was refused.
        message: String,
    },

    // --- Lifecycle errors ---
    /// A lifecycle transition that the state machine does not allow.
    #[error("Plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// The plugin.
        plugin: String,
        /// Current state.
        from: PluginState,
        /// Requested state.
        to: PluginState,
    },

    /// A lifecycle callback failed or panicked.
    #[error("Plugin '{plugin}' lifecycle failure: {message}")]
    Lifecycle {
        /// The plugin.
        plugin: String,
        /// What happened.
        message: String,
    },

    // --- Registration errors ---
    /// The hook type is not part of the closed set.
    #[error("Invalid hook type '{name}'")]
    InvalidHookType {
        /// The rejected name.
        name: String,
    },

    /// A duplicate or invalid hook/middleware registration.
    #[error("Registration rejected for '{plugin}': {message}")]
    Registration {
        /// The registering plugin.
        plugin: String,
        /// Why it was rejected.
        message: String,
    },

    // --- Reload errors ---
    /// The fresh instance failed after the old one was torn down.
    #[error("Reload of '{plugin}' failed: {source}")]
    Reload {
        /// The reloaded plugin.
        plugin: String,
        /// The failure of the fresh instance.
        #[source]
        source: Box<PluginError>,
    },

    // --- Service errors ---
    /// No binding exists for the requested service.
    #[error("Service '{service}' exported by '{plugin}' not found")]
    ServiceNotFound {
        /// The exporting plugin.
        plugin: String,
        /// The service name.
        service: String,
    },

    /// A binding exists but holds a different type.
    #[error("Service '{service}' exported by '{plugin}' is not a {expected}")]
    ServiceTypeMismatch {
        /// The exporting plugin.
        plugin: String,
        /// The service name.
        service: String,
        /// Requested type name.
        expected: &'static str,
    },

    /// The capability was granted but the host provides no implementation.
    #[error("Capability '{capability}' is not provided by this host")]
    CapabilityUnavailable {
        /// The capability name.
        capability: String,
    },

    // --- Runtime handler errors ---
    /// A hook, middleware, event handler or endpoint returned an error.
    #[error("Handler from '{plugin}' failed: {message}")]
    Handler {
        /// The owning plugin.
        plugin: String,
        /// What happened.
        message: String,
    },

    /// A request-shaping hook halted the request.
    #[error("Request halted by '{plugin}': {reason}")]
    Halted {
        /// The halting plugin.
        plugin: String,
        /// Reason given by the handler.
        reason: String,
    },

    /// An async topic queue stayed full past the publisher's deadline.
    #[error("Event queue for topic '{topic}' is full")]
    EventQueueFull {
        /// The topic.
        topic: String,
    },

    /// An operation ran past its deadline.
    #[error("'{plugin}' timed out during {operation} after {timeout_ms}ms")]
    Timeout {
        /// The plugin whose code was running.
        plugin: String,
        /// What was running.
        operation: String,
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// The caller's cancellation token fired.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// What was cancelled.
        operation: String,
    },

    // --- Storage errors ---
    /// A storage backend failure.
    #[error("Storage failure for '{plugin}': {message}")]
    Storage {
        /// The namespace owner.
        plugin: String,
        /// What happened.
        message: String,
    },
}

impl PluginError {
    /// Creates a handler error, the usual way extensions report failures.
    pub fn handler(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Creates a lifecycle error.
    pub fn lifecycle(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lifecycle {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Creates a manifest error.
    pub fn manifest(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Manifest {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Creates a permission error.
    pub fn permission(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permission {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Creates a registration error.
    pub fn registration(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registration {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Returns the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Manifest { .. } | Self::InvalidConfig { .. } => ErrorKind::Manifest,
            Self::UnknownPlugin { .. } => ErrorKind::NotFound,
            Self::CyclicDependency { .. }
            | Self::MissingDependency { .. }
            | Self::IncompatibleDependency { .. }
            | Self::DependencyNotReady { .. }
            | Self::DependencyFailed { .. } => ErrorKind::Dependency,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::InvalidTransition { .. } | Self::Lifecycle { .. } => ErrorKind::Lifecycle,
            Self::InvalidHookType { .. } | Self::Registration { .. } => ErrorKind::Registration,
            Self::Reload { .. } => ErrorKind::Reload,
            Self::ServiceNotFound { .. }
            | Self::ServiceTypeMismatch { .. }
            | Self::CapabilityUnavailable { .. } => ErrorKind::Service,
            Self::Handler { .. } | Self::Halted { .. } => ErrorKind::Handler,
            Self::EventQueueFull { .. } | Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Returns whether this is a dependency-category error.
    pub fn is_dependency_error(&self) -> bool {
        self.kind() == ErrorKind::Dependency
    }
}

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = err.kind();
        AppError::with_source(kind, err.to_string(), err)
    }
}
