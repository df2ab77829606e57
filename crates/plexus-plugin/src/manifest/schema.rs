//! Plugin configuration schema and validation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{PluginError, PluginResult};

/// JSON type a configuration field must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldType {
    /// A JSON string.
    String,
    /// A JSON integer.
    Integer,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
    /// No type constraint.
    #[default]
    Any,
}

impl ConfigFieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ConfigFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        write!(f, "{name}")
    }
}

/// One declared configuration field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Expected JSON type.
    #[serde(rename = "type", default)]
    pub field_type: ConfigFieldType,
    /// Value used when the field is absent.
    #[serde(default)]
    pub default: Option<Value>,
    /// Whether the field must be supplied when there is no default.
    #[serde(default)]
    pub required: bool,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

impl ConfigField {
    /// Creates a field of the given type.
    pub fn new(field_type: ConfigFieldType) -> Self {
        Self {
            field_type,
            ..Default::default()
        }
    }

    /// Sets the default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Marks the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the description.
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Configuration schema declared by a plugin: field name → [`ConfigField`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    /// Declared fields, ordered by name.
    pub fields: BTreeMap<String, ConfigField>,
}

impl ConfigSchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    pub fn field(mut self, name: &str, field: ConfigField) -> Self {
        self.fields.insert(name.to_string(), field);
        self
    }

    /// Returns whether the schema declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validates `input` and returns the effective configuration object.
    ///
    /// Defaults are filled in for absent fields, required fields without a
    /// default must be present, and every declared field must have the
    /// declared JSON type. Undeclared keys are passed through unchanged.
    pub fn validate(&self, plugin: &str, input: Option<&Value>) -> PluginResult<Value> {
        let mut resolved: Map<String, Value> = match input {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(PluginError::InvalidConfig {
                    plugin: plugin.to_string(),
                    message: format!("expected an object, got {other}"),
                });
            }
        };

        for (name, field) in &self.fields {
            match resolved.get(name) {
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        return Err(PluginError::InvalidConfig {
                            plugin: plugin.to_string(),
                            message: format!(
                                "field '{name}' must be of type {}, got {value}",
                                field.field_type
                            ),
                        });
                    }
                }
                None => match &field.default {
                    Some(default) => {
                        resolved.insert(name.clone(), default.clone());
                    }
                    None if field.required => {
                        return Err(PluginError::InvalidConfig {
                            plugin: plugin.to_string(),
                            message: format!("required field '{name}' is missing"),
                        });
                    }
                    None => {}
                },
            }
        }

        for key in resolved.keys() {
            if !self.fields.contains_key(key) {
                debug!(plugin = %plugin, key = %key, "Configuration key not declared in schema");
            }
        }

        Ok(Value::Object(resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .field(
                "ttl_seconds",
                ConfigField::new(ConfigFieldType::Integer).with_default(json!(60)),
            )
            .field("endpoint", ConfigField::new(ConfigFieldType::String).required())
    }

    #[test]
    fn test_defaults_are_filled() {
        let config = schema()
            .validate("cache-ext", Some(&json!({"endpoint": "mem://"})))
            .expect("valid");
        assert_eq!(config["ttl_seconds"], json!(60));
        assert_eq!(config["endpoint"], json!("mem://"));
    }

    #[test]
    fn test_missing_required_field() {
        let err = schema().validate("cache-ext", None).expect_err("missing");
        assert!(matches!(err, PluginError::InvalidConfig { .. }));
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_type_mismatch() {
        let err = schema()
            .validate(
                "cache-ext",
                Some(&json!({"endpoint": "mem://", "ttl_seconds": "soon"})),
            )
            .expect_err("wrong type");
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn test_undeclared_keys_pass_through() {
        let config = ConfigSchema::new()
            .validate("x", Some(&json!({"extra": true})))
            .expect("valid");
        assert_eq!(config["extra"], json!(true));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(ConfigSchema::new().validate("x", Some(&json!([1, 2]))).is_err());
    }
}
