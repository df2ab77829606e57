//! Manifest discovery on disk.
//!
//! A plugin directory holds either loose manifest files (`audit.toml`) or one
//! sub-directory per plugin containing `plugin.<ext>`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};
use crate::manifest::{ManifestFormat, PluginManifest};

const MANIFEST_STEM: &str = "plugin";
const EXTENSIONS: [&str; 4] = ["toml", "json", "yaml", "yml"];

/// A manifest file found on disk and its parse result.
#[derive(Debug, Clone)]
pub struct DiscoveredManifest {
    /// The manifest file.
    pub path: PathBuf,
    /// Parsed manifest, or why it could not be parsed.
    pub manifest: PluginResult<PluginManifest>,
}

/// Scans `dir` for manifests, sorted by path.
///
/// A missing directory yields an empty list.
pub async fn discover_manifests(dir: impl AsRef<Path>) -> PluginResult<Vec<DiscoveredManifest>> {
    let dir = dir.as_ref();
    let source = dir.display().to_string();
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        debug!(dir = %source, "Plugin directory does not exist");
        return Ok(Vec::new());
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PluginError::manifest(&source, format!("cannot read directory: {e}")))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PluginError::manifest(&source, format!("cannot read directory: {e}")))?
    {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            if let Some(found) = nested_manifest(&path).await {
                paths.push(found);
            }
        } else if ManifestFormat::from_path(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();

    let found = paths
        .into_iter()
        .map(|path| {
            let manifest = PluginManifest::from_path(&path);
            if let Err(err) = &manifest {
                warn!(path = %path.display(), error = %err, "Invalid plugin manifest");
            }
            DiscoveredManifest { path, manifest }
        })
        .collect::<Vec<_>>();
    debug!(dir = %source, count = found.len(), "Manifests discovered");
    Ok(found)
}

/// Finds the manifest for the plugin named `name` in `dir`.
pub async fn find_manifest(dir: impl AsRef<Path>, name: &str) -> PluginResult<Option<PluginManifest>> {
    Ok(discover_manifests(dir)
        .await?
        .into_iter()
        .filter_map(|d| d.manifest.ok())
        .find(|m| m.name == name))
}

async fn nested_manifest(dir: &Path) -> Option<PathBuf> {
    for ext in EXTENSIONS {
        let candidate = dir.join(format!("{MANIFEST_STEM}.{ext}"));
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discovers_loose_and_nested_manifests() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("audit.toml"),
            "name = \"audit\"\nversion = \"1.0.0\"\n",
        )
        .expect("write");
        std::fs::create_dir(dir.path().join("cache")).expect("mkdir");
        std::fs::write(
            dir.path().join("cache").join("plugin.json"),
            r#"{"name": "cache-ext", "version": "2.0.0"}"#,
        )
        .expect("write");
        std::fs::write(dir.path().join("broken.yaml"), "name: [").expect("write");
        std::fs::write(dir.path().join("README.md"), "ignored").expect("write");

        let found = discover_manifests(dir.path()).await.expect("scan");
        assert_eq!(found.len(), 3);
        let valid: Vec<String> = found
            .iter()
            .filter_map(|d| d.manifest.as_ref().ok())
            .map(|m| m.name.clone())
            .collect();
        assert_eq!(valid, vec!["audit".to_string(), "cache-ext".to_string()]);

        let cache = find_manifest(dir.path(), "cache-ext").await.expect("scan");
        assert_eq!(cache.map(|m| m.version), Some("2.0.0".to_string()));
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let found = discover_manifests(dir.path().join("absent")).await.expect("scan");
        assert!(found.is_empty());
    }
}
