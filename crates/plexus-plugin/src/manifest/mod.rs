//! Plugin manifests and validated descriptors.
//!
//! A [`PluginManifest`] is the format-agnostic, serde-level view of an
//! extension's metadata (TOML, JSON and YAML are all accepted). Validation
//! turns it into an immutable [`PluginDescriptor`] with parsed versions,
//! typed hook declarations and a capability set.

pub mod schema;

use std::path::Path;
use std::str::FromStr;

use plexus_core::{Capability, CapabilitySet};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::hooks::definitions::HookType;

pub use schema::{ConfigField, ConfigFieldType, ConfigSchema};

/// Default priority for hooks declared without one.
pub const DEFAULT_HOOK_PRIORITY: i32 = 100;

/// A declared dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Name of the plugin depended upon.
    pub name: String,
    /// Semver requirement, e.g. `^1.2`; `*` accepts any version.
    #[serde(default = "any_version")]
    pub version_constraint: String,
    /// Optional dependencies only order the load sequence when present.
    #[serde(default)]
    pub optional: bool,
}

impl DependencySpec {
    /// A required dependency.
    pub fn required(name: &str, version_constraint: &str) -> Self {
        Self {
            name: name.to_string(),
            version_constraint: version_constraint.to_string(),
            optional: false,
        }
    }

    /// An optional dependency.
    pub fn optional(name: &str, version_constraint: &str) -> Self {
        Self {
            name: name.to_string(),
            version_constraint: version_constraint.to_string(),
            optional: true,
        }
    }
}

fn any_version() -> String {
    "*".to_string()
}

/// Capability flags as written in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSet {
    /// Database access.
    pub database: bool,
    /// Shared cache access.
    pub cache: bool,
    /// Route and middleware registration.
    pub router: bool,
    /// Host configuration access.
    pub config: bool,
    /// Sandboxed filesystem access.
    pub filesystem: bool,
    /// Outbound network access.
    pub network: bool,
    /// Process execution.
    pub exec: bool,
}

impl PermissionSet {
    /// Converts the flags into a [`CapabilitySet`].
    pub fn capabilities(&self) -> CapabilitySet {
        let flags = [
            (self.database, Capability::Database),
            (self.cache, Capability::Cache),
            (self.router, Capability::Router),
            (self.config, Capability::Configuration),
            (self.filesystem, Capability::Filesystem),
            (self.network, Capability::Network),
            (self.exec, Capability::ProcessExecution),
        ];
        flags
            .into_iter()
            .filter_map(|(granted, capability)| granted.then_some(capability))
            .collect()
    }

    /// Builds flags from a list of capabilities.
    pub fn from_capabilities(capabilities: &[Capability]) -> Self {
        let set: CapabilitySet = capabilities.iter().copied().collect();
        Self {
            database: set.contains(Capability::Database),
            cache: set.contains(Capability::Cache),
            router: set.contains(Capability::Router),
            config: set.contains(Capability::Configuration),
            filesystem: set.contains(Capability::Filesystem),
            network: set.contains(Capability::Network),
            exec: set.contains(Capability::ProcessExecution),
        }
    }
}

/// A hook the plugin declares it will register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDeclaration {
    /// Hook type name, e.g. `pre-request`.
    #[serde(rename = "type")]
    pub hook_type: String,
    /// Default priority (higher runs first).
    #[serde(default = "default_priority")]
    pub priority: i32,
}

impl HookDeclaration {
    /// Declares `hook_type` at `priority`.
    pub fn new(hook_type: HookType, priority: i32) -> Self {
        Self {
            hook_type: hook_type.as_str().to_string(),
            priority,
        }
    }
}

fn default_priority() -> i32 {
    DEFAULT_HOOK_PRIORITY
}

/// Event topics the plugin publishes and subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDeclarations {
    /// Topics published.
    pub publishes: Vec<String>,
    /// Topics subscribed to.
    pub subscribes: Vec<String>,
}

/// Serialization format of a manifest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// TOML.
    Toml,
    /// JSON.
    Json,
    /// YAML.
    Yaml,
}

impl ManifestFormat {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Some(Self::Toml),
            Some("json") => Some(Self::Json),
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            _ => None,
        }
    }

    fn file_format(self) -> config::FileFormat {
        match self {
            Self::Toml => config::FileFormat::Toml,
            Self::Json => config::FileFormat::Json,
            Self::Yaml => config::FileFormat::Yaml,
        }
    }
}

/// Format-agnostic plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Globally unique plugin name.
    pub name: String,
    /// Semver version.
    pub version: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Author or maintainer.
    #[serde(default)]
    pub author: String,
    /// Host framework versions this plugin runs on.
    #[serde(default)]
    pub framework_version_constraint: Option<String>,
    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    /// Requested capabilities.
    #[serde(default)]
    pub permissions: PermissionSet,
    /// Configuration schema.
    #[serde(default)]
    pub config: ConfigSchema,
    /// Hooks the plugin registers.
    #[serde(default)]
    pub hooks: Vec<HookDeclaration>,
    /// Event topics.
    #[serde(default)]
    pub events: EventDeclarations,
    /// Service names the plugin exports.
    #[serde(default)]
    pub exports: Vec<String>,
}

impl PluginManifest {
    /// Parses a manifest from a string in the given format.
    pub fn parse(content: &str, format: ManifestFormat) -> PluginResult<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(content, format.file_format()))
            .build()
            .and_then(|c| c.try_deserialize::<PluginManifest>())
            .map_err(|e| PluginError::manifest("<unparsed>", e.to_string()))
    }

    /// Reads and parses a manifest file; the format follows the extension.
    pub fn from_path(path: &Path) -> PluginResult<Self> {
        let source = path.display().to_string();
        let format = ManifestFormat::from_path(path).ok_or_else(|| {
            PluginError::manifest(&source, "unsupported manifest extension")
        })?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| PluginError::manifest(&source, format!("cannot read: {e}")))?;
        Self::parse(&content, format).map_err(|e| match e {
            PluginError::Manifest { message, .. } => PluginError::manifest(source, message),
            other => other,
        })
    }

    /// Validates the manifest into an immutable descriptor.
    pub fn into_descriptor(self) -> PluginResult<PluginDescriptor> {
        PluginDescriptor::from_manifest(self)
    }
}

/// A validated dependency edge.
#[derive(Debug, Clone)]
pub struct Dependency {
    /// Name of the plugin depended upon.
    pub name: String,
    /// Parsed version requirement.
    pub constraint: VersionReq,
    /// Whether the edge is dropped when the target is absent.
    pub optional: bool,
}

/// A validated hook declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredHook {
    /// The hook type.
    pub hook_type: HookType,
    /// Declared priority.
    pub priority: i32,
}

/// Immutable, validated description of a registered plugin.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Globally unique name.
    pub name: String,
    /// Parsed version.
    pub version: Version,
    /// Short description.
    pub description: String,
    /// Author.
    pub author: String,
    /// Required host framework version range.
    pub framework_constraint: Option<VersionReq>,
    /// Dependency edges.
    pub dependencies: Vec<Dependency>,
    /// Requested capabilities.
    pub capabilities: CapabilitySet,
    /// Configuration schema.
    pub config_schema: ConfigSchema,
    /// Hooks the plugin may register.
    pub hooks: Vec<DeclaredHook>,
    /// Topics published.
    pub publishes: Vec<String>,
    /// Topics subscribed to.
    pub subscribes: Vec<String>,
    /// Service names the plugin may export.
    pub exports: Vec<String>,
    manifest: PluginManifest,
}

impl PluginDescriptor {
    /// Validates `manifest` into a descriptor.
    pub fn from_manifest(manifest: PluginManifest) -> PluginResult<Self> {
        let name = manifest.name.clone();
        validate_name(&name)?;

        let version = Version::parse(&manifest.version).map_err(|e| {
            PluginError::manifest(&name, format!("invalid version '{}': {e}", manifest.version))
        })?;

        let framework_constraint = manifest
            .framework_version_constraint
            .as_deref()
            .map(|req| parse_req(&name, "framework_version_constraint", req))
            .transpose()?;

        let mut dependencies = Vec::with_capacity(manifest.dependencies.len());
        for spec in &manifest.dependencies {
            if spec.name == name {
                return Err(PluginError::manifest(&name, "a plugin cannot depend on itself"));
            }
            if dependencies.iter().any(|d: &Dependency| d.name == spec.name) {
                return Err(PluginError::manifest(
                    &name,
                    format!("dependency '{}' declared twice", spec.name),
                ));
            }
            dependencies.push(Dependency {
                name: spec.name.clone(),
                constraint: parse_req(&name, &spec.name, &spec.version_constraint)?,
                optional: spec.optional,
            });
        }

        let hooks = manifest
            .hooks
            .iter()
            .map(|decl| {
                Ok(DeclaredHook {
                    hook_type: HookType::from_str(&decl.hook_type)?,
                    priority: decl.priority,
                })
            })
            .collect::<PluginResult<Vec<_>>>()?;

        Ok(Self {
            version,
            description: manifest.description.clone(),
            author: manifest.author.clone(),
            framework_constraint,
            dependencies,
            capabilities: manifest.permissions.capabilities(),
            config_schema: manifest.config.clone(),
            hooks,
            publishes: manifest.events.publishes.clone(),
            subscribes: manifest.events.subscribes.clone(),
            exports: manifest.exports.clone(),
            name,
            manifest,
        })
    }

    /// Returns the manifest this descriptor was validated from.
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Returns whether the plugin declared hooks of `hook_type`.
    pub fn declares_hook(&self, hook_type: HookType) -> bool {
        self.hooks.iter().any(|h| h.hook_type == hook_type)
    }

    /// Returns the declared priority for `hook_type`, if declared.
    pub fn hook_priority(&self, hook_type: HookType) -> Option<i32> {
        self.hooks
            .iter()
            .find(|h| h.hook_type == hook_type)
            .map(|h| h.priority)
    }

    /// Returns whether the plugin declared `service` in its exports.
    pub fn declares_export(&self, service: &str) -> bool {
        self.exports.iter().any(|s| s == service)
    }

    /// Returns the names of required dependencies.
    pub fn required_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| !d.optional)
            .map(|d| d.name.as_str())
    }

    /// Returns whether this plugin depends (optionally or not) on `name`.
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d.name == name)
    }

    /// Checks the framework constraint against the host version.
    pub fn check_framework(&self, host_version: &Version) -> PluginResult<()> {
        match &self.framework_constraint {
            Some(req) if !req.matches(host_version) => Err(PluginError::manifest(
                &self.name,
                format!("requires framework {req}, host is {host_version}"),
            )),
            _ => Ok(()),
        }
    }
}

fn validate_name(name: &str) -> PluginResult<()> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid_first && valid_rest {
        Ok(())
    } else {
        Err(PluginError::manifest(
            name,
            "name must start with an ASCII letter or digit and contain only [A-Za-z0-9._-]",
        ))
    }
}

fn parse_req(plugin: &str, what: &str, req: &str) -> PluginResult<VersionReq> {
    VersionReq::parse(req).map_err(|e| {
        PluginError::manifest(plugin, format!("invalid version constraint for {what} '{req}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_MANIFEST: &str = r#"
name = "cache-ext"
version = "1.2.0"
description = "In-memory cache"
author = "Plexus"
framework_version_constraint = ">=0.1"
exports = ["CacheService"]

[[dependencies]]
name = "metrics"
version_constraint = "^2"
optional = true

[permissions]
cache = true
router = true

[config.ttl_seconds]
type = "integer"
default = 60
description = "Entry lifetime"

[[hooks]]
type = "post-request"
priority = 10

[events]
publishes = ["cache.evicted"]
"#;

    #[test]
    fn test_parse_toml_manifest() {
        let manifest = PluginManifest::parse(TOML_MANIFEST, ManifestFormat::Toml).expect("parse");
        assert_eq!(manifest.name, "cache-ext");
        assert!(manifest.permissions.cache);
        assert!(!manifest.permissions.database);
        assert_eq!(manifest.hooks[0].priority, 10);
        assert_eq!(manifest.config.fields["ttl_seconds"].field_type, ConfigFieldType::Integer);

        let descriptor = manifest.into_descriptor().expect("valid");
        assert!(descriptor.declares_hook(HookType::PostRequest));
        assert!(descriptor.declares_export("CacheService"));
        assert!(descriptor.capabilities.contains(Capability::Router));
        assert!(descriptor.dependencies[0].optional);
        assert_eq!(descriptor.required_dependencies().count(), 0);
    }

    #[test]
    fn test_parse_json_manifest() {
        let json = r#"{
            "name": "audit",
            "version": "0.3.1",
            "dependencies": [{"name": "cache-ext"}],
            "hooks": [{"type": "error"}]
        }"#;
        let descriptor = PluginManifest::parse(json, ManifestFormat::Json)
            .and_then(PluginManifest::into_descriptor)
            .expect("valid");
        assert!(descriptor.dependencies[0].constraint.matches(&Version::new(9, 9, 9)));
        assert_eq!(descriptor.hook_priority(HookType::Error), Some(DEFAULT_HOOK_PRIORITY));
    }

    #[test]
    fn test_unknown_hook_type_is_rejected() {
        let manifest = PluginManifest {
            name: "x".into(),
            version: "1.0.0".into(),
            hooks: vec![HookDeclaration {
                hook_type: "mid-request".into(),
                priority: 1,
            }],
            ..Default::default()
        };
        assert!(matches!(
            manifest.into_descriptor(),
            Err(PluginError::InvalidHookType { .. })
        ));
    }

    #[test]
    fn test_invalid_version_and_name() {
        let bad_version = PluginManifest {
            name: "x".into(),
            version: "one".into(),
            ..Default::default()
        };
        assert!(matches!(bad_version.into_descriptor(), Err(PluginError::Manifest { .. })));

        let bad_name = PluginManifest {
            name: "../etc".into(),
            version: "1.0.0".into(),
            ..Default::default()
        };
        assert!(bad_name.into_descriptor().is_err());
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let manifest = PluginManifest {
            name: "loop".into(),
            version: "1.0.0".into(),
            dependencies: vec![DependencySpec::required("loop", "*")],
            ..Default::default()
        };
        assert!(manifest.into_descriptor().is_err());
    }

    #[test]
    fn test_framework_constraint() {
        let manifest = PluginManifest {
            name: "future".into(),
            version: "1.0.0".into(),
            framework_version_constraint: Some(">=2.0".into()),
            ..Default::default()
        };
        let descriptor = manifest.into_descriptor().expect("valid");
        assert!(descriptor.check_framework(&Version::new(1, 9, 0)).is_err());
        assert!(descriptor.check_framework(&Version::new(2, 1, 0)).is_ok());
    }

    #[test]
    fn test_from_path_picks_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.yaml");
        std::fs::write(&path, "name: cache-ext\nversion: 1.0.0\nexports: [CacheService]\n")
            .expect("write");
        let manifest = PluginManifest::from_path(&path).expect("parse");
        assert_eq!(manifest.exports, vec!["CacheService".to_string()]);

        let unknown = dir.path().join("cache.ini");
        std::fs::write(&unknown, "").expect("write");
        assert!(PluginManifest::from_path(&unknown).is_err());
    }
}
