//! Plugin storage configuration.

use serde::{Deserialize, Serialize};

/// Which backend persists plugin key/value namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// Process-local memory; contents are lost on restart.
    #[default]
    Memory,
    /// One JSON document per namespace under `directory`.
    File,
}

/// Plugin storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Directory used by the file backend.
    #[serde(default = "default_directory")]
    pub directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            directory: default_directory(),
        }
    }
}

fn default_directory() -> String {
    "data/plugin-storage".to_string()
}
