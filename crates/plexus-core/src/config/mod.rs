//! Host configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from an
//! optional file (TOML, JSON or YAML, chosen by extension) overlaid with
//! `PLEXUS__`-prefixed environment variables. Every field carries a serde
//! default so a missing file still yields a usable configuration.

pub mod events;
pub mod logging;
pub mod plugin;
pub mod runtime;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use self::events::{AsyncTopicConfig, BackpressureMode, EventBusConfig};
pub use self::logging::LoggingConfig;
pub use self::plugin::PluginsConfig;
pub use self::runtime::RuntimeConfig;
pub use self::storage::{StorageBackendKind, StorageConfig};

use crate::error::AppError;

/// Root host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Runtime timeouts and framework identity.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Extension discovery, host policy, and per-plugin settings.
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Event bus delivery settings.
    #[serde(default)]
    pub events: EventBusConfig,
    /// Plugin storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from `path` (optional) and the environment.
    ///
    /// Environment variables use the `PLEXUS` prefix and `__` as the section
    /// separator, e.g. `PLEXUS__RUNTIME__HOOK_TIMEOUT_SECONDS=5`.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("PLEXUS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Capability;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load("/nonexistent/plexus-config").expect("defaults");
        assert_eq!(config.runtime.hook_timeout_seconds, 30);
        assert_eq!(config.plugins.directory, "./plugins");
        assert!(config.events.async_topics.is_empty());
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plexus.toml");
        std::fs::write(
            &path,
            r#"
[runtime]
lifecycle_timeout_seconds = 5

[plugins]
denied_capabilities = ["exec", "network"]

[plugins.settings.request-audit]
flush_interval_seconds = 2

[[events.async_topics]]
topic = "audit.flushed"
capacity = 16
policy = "drop_oldest"
"#,
        )
        .expect("write");

        let config = AppConfig::load(path.to_str().expect("utf8")).expect("load");
        assert_eq!(config.runtime.lifecycle_timeout_seconds, 5);
        assert_eq!(
            config.plugins.denied_capabilities,
            vec![Capability::ProcessExecution, Capability::Network]
        );
        assert_eq!(
            config.plugins.settings["request-audit"]["flush_interval_seconds"],
            serde_json::json!(2)
        );
        assert_eq!(config.events.async_topics[0].policy, BackpressureMode::DropOldest);
    }
}
