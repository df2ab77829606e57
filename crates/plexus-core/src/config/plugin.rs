//! Extension discovery and host policy configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Capability;

/// Plugin system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory containing extension manifests.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// Whether to initialize and start registered extensions on startup.
    #[serde(default = "default_true")]
    pub auto_load: bool,
    /// Capabilities the host refuses to grant to any extension.
    #[serde(default)]
    pub denied_capabilities: Vec<Capability>,
    /// Extensions the host bootstrap skips registering.
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Per-extension configuration objects, keyed by extension name.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            auto_load: true,
            denied_capabilities: Vec::new(),
            disabled: Vec::new(),
            settings: HashMap::new(),
        }
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_true() -> bool {
    true
}
