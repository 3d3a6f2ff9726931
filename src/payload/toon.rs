//! Token-Oriented Object Notation (TOON) encoding.
//!
//! TOON is a compact, indentation-based text rendering of JSON data that
//! tokenizes smaller than JSON for LLM consumers, especially for uniform
//! arrays of records which collapse into a tabular form:
//!
//! ```text
//! [3]{id,name}:
//!   1,a
//!   2,b
//!   3,c
//! ```
//!
//! The encoder is a pure function over `serde_json::Value`; it never fails.

use serde_json::{Map, Value};

const INDENT: &str = "  ";

/// Encode a JSON value as TOON text.
pub fn encode(value: &Value) -> String {
    let mut lines = Vec::new();
    match value {
        Value::Object(map) => encode_entries(&mut lines, map, 0),
        Value::Array(items) => encode_array(&mut lines, None, items, 0),
        scalar => lines.push(format_scalar(scalar)),
    }
    lines.join("\n")
}

fn pad(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn encode_entries(lines: &mut Vec<String>, map: &Map<String, Value>, depth: usize) {
    for (key, value) in map {
        match value {
            Value::Object(inner) => {
                lines.push(format!("{}{}:", pad(depth), format_key(key)));
                encode_entries(lines, inner, depth + 1);
            }
            Value::Array(items) => encode_array(lines, Some(key), items, depth),
            scalar => lines.push(format!(
                "{}{}: {}",
                pad(depth),
                format_key(key),
                format_scalar(scalar)
            )),
        }
    }
}

fn encode_array(lines: &mut Vec<String>, key: Option<&str>, items: &[Value], depth: usize) {
    let prefix = key.map(format_key).unwrap_or_default();

    if items.is_empty() {
        lines.push(format!("{}{prefix}[0]:", pad(depth)));
        return;
    }

    if items.iter().all(is_scalar) {
        let row = items
            .iter()
            .map(format_scalar)
            .collect::<Vec<_>>()
            .join(",");
        lines.push(format!("{}{prefix}[{}]: {row}", pad(depth), items.len()));
        return;
    }

    if let Some(fields) = tabular_fields(items) {
        lines.push(format!(
            "{}{prefix}[{}]{{{}}}:",
            pad(depth),
            items.len(),
            fields.join(",")
        ));
        for item in items {
            if let Value::Object(map) = item {
                let row = fields
                    .iter()
                    .map(|f| map.get(f).map_or_else(String::new, format_scalar))
                    .collect::<Vec<_>>()
                    .join(",");
                lines.push(format!("{}{row}", pad(depth + 1)));
            }
        }
        return;
    }

    // Non-uniform arrays fall back to list form, one `- ` item per element.
    lines.push(format!("{}{prefix}[{}]:", pad(depth), items.len()));
    for item in items {
        let mut item_lines = Vec::new();
        match item {
            Value::Object(map) => encode_entries(&mut item_lines, map, 0),
            Value::Array(inner) => encode_array(&mut item_lines, None, inner, 0),
            scalar => item_lines.push(format_scalar(scalar)),
        }
        let mut first = true;
        for line in item_lines {
            if first {
                lines.push(format!("{}- {line}", pad(depth + 1)));
                first = false;
            } else {
                lines.push(format!("{}{line}", pad(depth + 2)));
            }
        }
    }
}

const fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// Column set for the tabular form: every element must be an object with the
/// same keys and scalar-only values.
fn tabular_fields(items: &[Value]) -> Option<Vec<String>> {
    let Some(Value::Object(first)) = items.first() else {
        return None;
    };
    let fields: Vec<String> = first.keys().cloned().collect();
    for item in items {
        let Value::Object(map) = item else {
            return None;
        };
        if map.len() != fields.len() || !fields.iter().all(|f| map.contains_key(f)) {
            return None;
        }
        if !map.values().all(is_scalar) {
            return None;
        }
    }
    Some(fields)
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format_string(s),
        // Scalar callers never pass containers; render compact JSON if one
        // slips through so the output stays parseable.
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn format_key(key: &str) -> String {
    format_string(key)
}

/// Quote a string only when the bare form would be ambiguous.
fn format_string(s: &str) -> String {
    if needs_quoting(s) {
        let escaped = s
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n");
        format!("\"{escaped}\"")
    } else {
        s.to_string()
    }
}

fn needs_quoting(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    if s.trim() != s {
        return true;
    }
    if matches!(s, "true" | "false" | "null") {
        return true;
    }
    if s.parse::<f64>().is_ok() {
        return true;
    }
    s.chars()
        .any(|c| matches!(c, ',' | ':' | '"' | '{' | '}' | '[' | ']' | '\n' | '#'))
}
