//! Extension manifest inspection commands.
//!
//! Everything here is read-only: manifests are discovered on disk, validated
//! into descriptors and resolved, but no extension is instantiated.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use tracing::debug;

use crate::output::{self, OutputFormat};
use plexus_core::error::AppError;
use plexus_plugin::discovery::{discover_manifests, find_manifest};
use plexus_plugin::{DependencyResolver, PluginDescriptor, PluginError, PluginInfo};

/// Arguments for plugin commands
#[derive(Debug, Args)]
pub struct PluginsArgs {
    /// Manifest directory; defaults to `plugins.directory` from the config
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Plugin subcommand
    #[command(subcommand)]
    pub command: PluginsCommand,
}

/// Plugin subcommands
#[derive(Debug, Subcommand)]
pub enum PluginsCommand {
    /// List discovered extensions
    List,
    /// Show one extension's manifest
    Show {
        /// Extension name
        name: String,
    },
    /// Validate every discovered manifest
    Validate,
    /// Print the dependency-resolved initialization order
    Order,
}

/// Plugin row for display
#[derive(Debug, Serialize, Tabled)]
pub struct PluginRow {
    /// Name
    #[tabled(rename = "Name")]
    pub name: String,
    /// Version
    #[tabled(rename = "Version")]
    pub version: String,
    /// Description
    #[tabled(rename = "Description")]
    pub description: String,
    /// Author
    #[tabled(rename = "Author")]
    pub author: String,
    /// Dependencies
    #[tabled(rename = "Depends On")]
    pub dependencies: String,
    /// Capabilities
    #[tabled(rename = "Capabilities")]
    pub capabilities: String,
    /// Hooks
    #[tabled(rename = "Hooks")]
    pub hooks: String,
    /// Exports
    #[tabled(rename = "Exports")]
    pub exports: String,
}

impl From<PluginInfo> for PluginRow {
    fn from(info: PluginInfo) -> Self {
        Self {
            name: info.name,
            version: info.version,
            description: info.description,
            author: info.author,
            dependencies: info.dependencies.join(", "),
            capabilities: info.capabilities,
            hooks: info.hooks.join(", "),
            exports: info.exports.join(", "),
        }
    }
}

/// Validation result row
#[derive(Debug, Serialize, Tabled)]
pub struct ValidationRow {
    /// Manifest file
    #[tabled(rename = "Manifest")]
    pub path: String,
    /// Extension name, when parsed
    #[tabled(rename = "Name")]
    pub name: String,
    /// `ok` or the error
    #[tabled(rename = "Result")]
    pub result: String,
}

/// Resolution row
#[derive(Debug, Serialize, Tabled)]
pub struct OrderRow {
    /// Position in the initialization order; `-` when excluded
    #[tabled(rename = "#")]
    pub position: String,
    /// Extension name
    #[tabled(rename = "Name")]
    pub name: String,
    /// Why it was excluded
    #[tabled(rename = "Note")]
    pub note: String,
}

/// A manifest that validated into a descriptor.
struct Loaded {
    path: PathBuf,
    descriptor: Arc<PluginDescriptor>,
}

/// Discovers manifests in `dir` and splits them into validated descriptors
/// and per-file failures.
async fn load_descriptors(dir: &Path) -> Result<(Vec<Loaded>, Vec<(PathBuf, PluginError)>), AppError> {
    let mut loaded = Vec::new();
    let mut invalid = Vec::new();
    for found in discover_manifests(dir).await? {
        match found.manifest.and_then(|m| m.into_descriptor()) {
            Ok(descriptor) => loaded.push(Loaded {
                path: found.path,
                descriptor: Arc::new(descriptor),
            }),
            Err(err) => invalid.push((found.path, err)),
        }
    }
    Ok((loaded, invalid))
}

fn validation_rows(loaded: &[Loaded], invalid: &[(PathBuf, PluginError)]) -> Vec<ValidationRow> {
    let mut rows: Vec<ValidationRow> = loaded
        .iter()
        .map(|l| ValidationRow {
            path: l.path.display().to_string(),
            name: l.descriptor.name.clone(),
            result: "ok".to_string(),
        })
        .chain(invalid.iter().map(|(path, err)| ValidationRow {
            path: path.display().to_string(),
            name: String::new(),
            result: err.to_string(),
        }))
        .collect();
    rows.sort_by(|a, b| a.path.cmp(&b.path));
    rows
}

fn order_rows(descriptors: &[Arc<PluginDescriptor>]) -> Result<Vec<OrderRow>, PluginError> {
    let resolution = DependencyResolver::resolve(descriptors)?;
    let ordered = resolution.order.into_iter().enumerate().map(|(i, name)| OrderRow {
        position: (i + 1).to_string(),
        name,
        note: String::new(),
    });
    let excluded = resolution.excluded.into_iter().map(|(name, err)| OrderRow {
        position: "-".to_string(),
        name,
        note: err.to_string(),
    });
    Ok(ordered.chain(excluded).collect())
}

/// Execute plugin commands
pub async fn execute(
    args: &PluginsArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => PathBuf::from(super::load_config(config_path)?.plugins.directory),
    };
    debug!(dir = %dir.display(), "Inspecting plugin manifests");

    match &args.command {
        PluginsCommand::List => {
            let (loaded, invalid) = load_descriptors(&dir).await?;
            let rows: Vec<PluginRow> = loaded
                .iter()
                .map(|l| PluginRow::from(PluginInfo::from_descriptor(&l.descriptor)))
                .collect();
            output::print_list(&rows, format);
            if !invalid.is_empty() {
                output::print_warning(&format!(
                    "{} manifest(s) skipped; run `plugins validate` for details",
                    invalid.len()
                ));
            }
        }
        PluginsCommand::Show { name } => match find_manifest(&dir, name).await? {
            Some(manifest) => output::print_item(&manifest, format),
            None => {
                return Err(AppError::not_found(format!(
                    "No manifest for '{name}' in {}",
                    dir.display()
                )));
            }
        },
        PluginsCommand::Validate => {
            let (loaded, invalid) = load_descriptors(&dir).await?;
            output::print_list(&validation_rows(&loaded, &invalid), format);
            if !invalid.is_empty() {
                return Err(AppError::manifest(format!(
                    "{} of {} manifest(s) invalid",
                    invalid.len(),
                    loaded.len() + invalid.len()
                )));
            }
            output::print_success(&format!("{} manifest(s) valid", loaded.len()));
        }
        PluginsCommand::Order => {
            let (loaded, _) = load_descriptors(&dir).await?;
            let descriptors: Vec<_> = loaded.into_iter().map(|l| l.descriptor).collect();
            let rows = order_rows(&descriptors)?;
            output::print_list(&rows, format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).expect("write manifest");
    }

    #[tokio::test]
    async fn test_load_splits_valid_and_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "base.toml", "name = \"base\"\nversion = \"1.0.0\"\n");
        write(dir.path(), "bad.toml", "name = \"bad\"\nversion = \"one\"\n");

        let (loaded, invalid) = load_descriptors(dir.path()).await.expect("scan");
        assert_eq!(loaded.len(), 1);
        assert_eq!(invalid.len(), 1);

        let rows = validation_rows(&loaded, &invalid);
        assert_eq!(rows[0].name, "");
        assert_ne!(rows[0].result, "ok");
        assert_eq!(rows[1].result, "ok");
    }

    #[tokio::test]
    async fn test_order_reports_exclusions() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "audit.toml",
            "name = \"audit\"\nversion = \"1.0.0\"\n\n[[dependencies]]\nname = \"base\"\n",
        );
        write(dir.path(), "base.toml", "name = \"base\"\nversion = \"1.0.0\"\n");
        write(
            dir.path(),
            "orphan.toml",
            "name = \"orphan\"\nversion = \"1.0.0\"\n\n[[dependencies]]\nname = \"ghost\"\n",
        );

        let (loaded, _) = load_descriptors(dir.path()).await.expect("scan");
        let descriptors: Vec<_> = loaded.into_iter().map(|l| l.descriptor).collect();
        let rows = order_rows(&descriptors).expect("acyclic");

        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["base", "audit", "orphan"]);
        assert_eq!(rows[2].position, "-");
        assert!(rows[2].note.contains("ghost"));
    }

    #[test]
    fn test_plugin_row_from_info() {
        let info = PluginInfo {
            name: "audit".into(),
            version: "1.0.0".into(),
            description: "Records requests".into(),
            author: "Plexus Team".into(),
            dependencies: vec!["base".into(), "metrics?".into()],
            capabilities: "router".into(),
            hooks: vec!["pre-request".into()],
            exports: Vec::new(),
        };
        let row = PluginRow::from(info);
        assert_eq!(row.version, "1.0.0");
        assert_eq!(row.description, "Records requests");
        assert_eq!(row.author, "Plexus Team");
        assert_eq!(row.dependencies, "base, metrics?");
        assert_eq!(row.exports, "");

        let json = serde_json::to_value(&row).expect("serializes");
        assert_eq!(json["description"], "Records requests");
        assert_eq!(json["author"], "Plexus Team");
        let table = tabled::Table::new([row]).to_string();
        assert!(table.contains("Description"));
        assert!(table.contains("Plexus Team"));
    }
}
