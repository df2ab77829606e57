//! Runtime timeouts and framework identity.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings governing how the runtime drives extension callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Version extensions are checked against via `framework_version_constraint`.
    #[serde(default = "default_framework_version")]
    pub framework_version: String,
    /// Bound on each `initialize`/`start`/`stop`/`cleanup` call.
    #[serde(default = "default_lifecycle_timeout")]
    pub lifecycle_timeout_seconds: u64,
    /// Bound on a single hook or middleware invocation.
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_seconds: u64,
    /// Bound on joining a plugin's background tasks during stop.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,
    /// Maximum number of distinct routes with a cached middleware chain.
    #[serde(default = "default_route_cache_capacity")]
    pub route_cache_capacity: usize,
}

impl RuntimeConfig {
    /// Lifecycle timeout as a [`Duration`].
    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle_timeout_seconds)
    }

    /// Hook timeout as a [`Duration`].
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_seconds)
    }

    /// Stop timeout as a [`Duration`].
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            framework_version: default_framework_version(),
            lifecycle_timeout_seconds: default_lifecycle_timeout(),
            hook_timeout_seconds: default_hook_timeout(),
            stop_timeout_seconds: default_stop_timeout(),
            route_cache_capacity: default_route_cache_capacity(),
        }
    }
}

fn default_framework_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_lifecycle_timeout() -> u64 {
    30
}

fn default_hook_timeout() -> u64 {
    30
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_route_cache_capacity() -> usize {
    1024
}
