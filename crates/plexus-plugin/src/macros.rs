//! Convenience macros for plugin development.

/// Builds a [`HookPayload`](crate::hooks::HookPayload) with data entries.
///
/// # Example
/// ```rust,ignore
/// let payload = hook_payload!(HookType::PostRequest, {
///     "path" => json!("/files"),
///     "status" => json!(200),
/// });
/// ```
#[macro_export]
macro_rules! hook_payload {
    ($hook:expr) => {
        $crate::prelude::HookPayload::new($hook)
    };
    ($hook:expr, { $($key:expr => $value:expr),* $(,)? }) => {{
        let mut payload = $crate::prelude::HookPayload::new($hook);
        $(
            payload.data.insert($key.to_string(), $value);
        )*
        payload
    }};
    ($hook:expr, request: $request:expr, { $($key:expr => $value:expr),* $(,)? }) => {{
        let mut payload = $crate::prelude::HookPayload::new($hook).with_request($request);
        $(
            payload.data.insert($key.to_string(), $value);
        )*
        payload
    }};
}

/// Declares a config schema inline.
///
/// # Example
/// ```rust,ignore
/// let schema = config_schema! {
///     "ttl_seconds" => integer, default: json!(60);
///     "endpoint" => string, required = true;
/// };
/// ```
#[macro_export]
macro_rules! config_schema {
    (@type string) => { $crate::manifest::ConfigFieldType::String };
    (@type integer) => { $crate::manifest::ConfigFieldType::Integer };
    (@type number) => { $crate::manifest::ConfigFieldType::Number };
    (@type boolean) => { $crate::manifest::ConfigFieldType::Boolean };
    (@type array) => { $crate::manifest::ConfigFieldType::Array };
    (@type object) => { $crate::manifest::ConfigFieldType::Object };
    (@type any) => { $crate::manifest::ConfigFieldType::Any };
    ($($name:literal => $ty:ident $(, default: $default:expr)? $(, required = $required:literal)?);* $(;)?) => {{
        let schema = $crate::manifest::ConfigSchema::new();
        $(
            #[allow(unused_mut)]
            let mut field = $crate::manifest::ConfigField::new($crate::config_schema!(@type $ty));
            $( field = field.with_default($default); )?
            $( if $required { field = field.required(); } )?
            let schema = schema.field($name, field);
        )*
        schema
    }};
}

#[cfg(test)]
mod tests {
    use crate::hooks::HookType;
    use crate::manifest::ConfigFieldType;
    use plexus_core::types::RequestId;
    use serde_json::json;

    #[test]
    fn test_hook_payload_macro() {
        let request = RequestId::new();
        let payload = hook_payload!(HookType::PostRequest, request: request, {
            "path" => json!("/files"),
            "status" => json!(200),
        });
        assert_eq!(payload.request_id, request);
        assert_eq!(payload.get_string("path"), Some("/files"));
        assert_eq!(payload.get_i64("status"), Some(200));
    }

    #[test]
    fn test_config_schema_macro() {
        let schema = config_schema! {
            "ttl_seconds" => integer, default: json!(60);
            "endpoint" => string, required = true;
        };
        assert_eq!(schema.fields["ttl_seconds"].field_type, ConfigFieldType::Integer);
        assert!(schema.fields["endpoint"].required);

        let filled = schema
            .validate("probe", Some(&json!({"endpoint": "http://x"})))
            .expect("valid");
        assert_eq!(filled["ttl_seconds"], json!(60));
        assert!(schema.validate("probe", Some(&json!({}))).is_err());
    }
}
