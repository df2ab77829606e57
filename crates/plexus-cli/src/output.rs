//! Rendering of command results as tables, key/value listings or JSON.

use serde::Serialize;
use serde_json::Value;
use tabled::{Table, Tabled};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}

/// Print rows as a table, or as a JSON array.
pub fn print_list<T: Serialize + Tabled>(rows: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table if rows.is_empty() => println!("(none)"),
        OutputFormat::Table => println!("{}", Table::new(rows)),
        OutputFormat::Json => print_json(rows),
    }
}

/// Print one document (a manifest, a config) as aligned fields, or as JSON.
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => match serde_json::to_value(item) {
            Ok(value) => item_lines(&value).iter().for_each(|line| println!("{line}")),
            Err(e) => print_error(&format!("cannot render output: {e}")),
        },
        OutputFormat::Json => print_json(item),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => print_error(&format!("cannot render output: {e}")),
    }
}

/// Top-level fields of `value`, one per line. Nested sections are flattened
/// into dotted keys; arrays and scalars are shown inline.
fn item_lines(value: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    flatten("", value, &mut lines);
    lines
}

fn flatten(prefix: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, lines);
            }
        }
        Value::String(s) => lines.push(kv_line(prefix, s)),
        other => lines.push(kv_line(prefix, &other.to_string())),
    }
}

fn kv_line(key: &str, value: &str) -> String {
    format!("  {:<32} {value}", format!("{key}:"))
}

/// Print a success message
pub fn print_success(msg: &str) {
    println!("✓ {msg}");
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("⚠ {msg}");
}

/// Print an error message
pub fn print_error(msg: &str) {
    eprintln!("✗ {msg}");
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: &str) {
    println!("{}", kv_line(key, value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_lines_flatten_sections() {
        let manifest = json!({
            "name": "request-audit",
            "permissions": {"router": true, "exec": false},
            "exports": ["audit-log"],
            "config": {},
        });

        let lines: Vec<String> = item_lines(&manifest)
            .into_iter()
            .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        assert!(lines.contains(&"name: request-audit".to_string()));
        assert!(lines.contains(&"permissions.router: true".to_string()));
        assert!(lines.contains(&"permissions.exec: false".to_string()));
        assert!(lines.contains(&r#"exports: ["audit-log"]"#.to_string()));
        assert!(lines.contains(&"config: {}".to_string()));
        assert_eq!(lines.len(), 5);
    }
}
