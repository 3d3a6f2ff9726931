//! JSON Schema to TypeScript type rendering.
//!
//! Verbose JSON Schema blocks tokenize poorly; the compact TypeScript form
//! keeps the same information in a fraction of the tokens. The renderer is
//! used only for diagnostic text (validation envelopes and describe output)
//! and never fails: anything it cannot express becomes `unknown`.

use serde_json::{Map, Value};

/// Recursion guard for pathological or self-referential schemas.
const MAX_DEPTH: usize = 32;

/// Converts JSON Schema values into TypeScript type definitions.
///
/// Supports basic types, typed arrays, objects with required/optional
/// properties, `anyOf`/`oneOf` unions, enum and const literals, nested
/// structures, and local `$ref` resolution.
pub struct SchemaConverter {
    include_descriptions: bool,
    max_description_len: usize,
    definitions: Map<String, Value>,
}

impl SchemaConverter {
    pub fn new(include_descriptions: bool, max_description_len: usize) -> Self {
        Self {
            include_descriptions,
            max_description_len,
            definitions: Map::new(),
        }
    }

    /// Render a schema as a TypeScript type string.
    pub fn convert(&mut self, schema: &Value) -> String {
        let Value::Object(map) = schema else {
            return "unknown".to_string();
        };
        if map.is_empty() {
            return "unknown".to_string();
        }

        // Keep local definitions around for $ref resolution.
        if let Some(Value::Object(defs)) = map.get("$defs").or_else(|| map.get("definitions")) {
            self.definitions = defs.clone();
        }

        self.convert_type(schema, 0)
    }

    fn convert_type(&self, schema: &Value, depth: usize) -> String {
        if depth > MAX_DEPTH {
            return "unknown".to_string();
        }
        let Value::Object(map) = schema else {
            return "unknown".to_string();
        };

        if let Some(Value::String(reference)) = map.get("$ref") {
            return self.resolve_ref(reference, depth);
        }
        if let Some(Value::Array(values)) = map.get("enum") {
            return convert_enum(values);
        }
        if let Some(value) = map.get("const") {
            return format_literal(value);
        }
        if let Some(Value::Array(variants)) = map.get("anyOf").or_else(|| map.get("oneOf")) {
            return self.convert_union(variants, depth);
        }
        if let Some(Value::Array(parts)) = map.get("allOf") {
            // Intersection simplified to its first member
            return parts
                .first()
                .map_or_else(|| "unknown".to_string(), |p| self.convert_type(p, depth + 1));
        }

        match map.get("type") {
            Some(Value::String(type_name)) => self.convert_named_type(type_name, map, depth),
            Some(Value::Array(type_names)) => {
                let types: Vec<String> = type_names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|t| self.convert_named_type(t, map, depth))
                    .collect();
                types.join(" | ")
            }
            _ => {
                // No type declared: infer from structure
                if map.contains_key("properties") {
                    self.convert_object(map, depth)
                } else if map.contains_key("items") {
                    self.convert_array(map, depth)
                } else {
                    "unknown".to_string()
                }
            }
        }
    }

    fn convert_named_type(&self, type_name: &str, map: &Map<String, Value>, depth: usize) -> String {
        match type_name {
            "string" => "string".to_string(),
            "number" | "integer" => "number".to_string(),
            "boolean" => "boolean".to_string(),
            "null" => "null".to_string(),
            "array" => self.convert_array(map, depth),
            "object" => self.convert_object(map, depth),
            _ => "unknown".to_string(),
        }
    }

    fn convert_array(&self, map: &Map<String, Value>, depth: usize) -> String {
        map.get("items").map_or_else(
            || "unknown[]".to_string(),
            |items| {
                let item_type = self.convert_type(items, depth + 1);
                if item_type.contains(" | ") {
                    format!("({item_type})[]")
                } else {
                    format!("{item_type}[]")
                }
            },
        )
    }

    fn convert_object(&self, map: &Map<String, Value>, depth: usize) -> String {
        let Some(Value::Object(properties)) = map.get("properties") else {
            // Empty object or additionalProperties only
            return match map.get("additionalProperties") {
                Some(Value::Bool(true)) => "Record<string, unknown>".to_string(),
                Some(additional @ Value::Object(_)) => {
                    let value_type = self.convert_type(additional, depth + 1);
                    format!("Record<string, {value_type}>")
                }
                _ => "{}".to_string(),
            };
        };
        if properties.is_empty() {
            return "{}".to_string();
        }

        let required: Vec<&str> = map
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields = Vec::with_capacity(properties.len());
        for (name, prop_schema) in properties {
            let optional_marker = if required.contains(&name.as_str()) {
                ""
            } else {
                "?"
            };
            let field_type = self.convert_type(prop_schema, depth + 1);
            let mut field = format!("{name}{optional_marker}: {field_type}");

            if self.include_descriptions
                && let Some(desc) = prop_schema.get("description").and_then(Value::as_str)
                && !desc.is_empty()
            {
                field.push_str(&format!(" /* {} */", truncate(desc, self.max_description_len)));
            }
            fields.push(field);
        }

        format!("{{{}}}", fields.join("; "))
    }

    fn convert_union(&self, variants: &[Value], depth: usize) -> String {
        let mut types: Vec<String> = Vec::new();
        for variant in variants {
            let t = self.convert_type(variant, depth + 1);
            if !types.contains(&t) {
                types.push(t);
            }
        }
        types.join(" | ")
    }

    fn resolve_ref(&self, reference: &str, depth: usize) -> String {
        // Local references: "#/$defs/Name" or "#/definitions/Name"
        if let Some(stripped) = reference.strip_prefix("#/") {
            let parts: Vec<&str> = stripped.split('/').collect();
            if parts.len() >= 2
                && matches!(parts[0], "$defs" | "definitions")
                && let Some(definition) = self.definitions.get(parts[1])
            {
                return self.convert_type(definition, depth + 1);
            }
        }
        // Unresolvable: fall back to the reference name
        reference
            .rsplit('/')
            .next()
            .unwrap_or(reference)
            .to_string()
    }
}

fn convert_enum(values: &[Value]) -> String {
    values
        .iter()
        .map(format_literal)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn format_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        }
        _ => "unknown".to_string(),
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Render a JSON Schema as a TypeScript type string.
pub fn json_schema_to_typescript(schema: &Value, max_description_len: usize) -> String {
    SchemaConverter::new(true, max_description_len).convert(schema)
}
