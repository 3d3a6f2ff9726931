//! Normalization of upstream `tools/call` responses.
//!
//! Upstreams answer with an ordered list of content items (text, image,
//! embedded resource). Callers want either a plain JSON value or the
//! multimodal items untouched. Text payloads are JSON-decoded, including the
//! double-encoded-string case some servers produce.

use rmcp::model::{CallToolResult, Content, RawContent};
use serde_json::Value;

/// Extracted form of an upstream tool response.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Plain serializable value (decoded text, list of texts, or null).
    Value(Value),
    /// One or more content items passed through verbatim. Never compressed.
    Multimodal(Vec<Content>),
}

impl Payload {
    pub const fn is_multimodal(&self) -> bool {
        matches!(self, Self::Multimodal(_))
    }

    /// Serializable representation, used for structured content and tests.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Multimodal(items) => serde_json::to_value(items).unwrap_or_default(),
        }
    }
}

/// Image and embedded-resource items stay structured end to end.
pub const fn is_multimodal_content(content: &Content) -> bool {
    matches!(
        content.raw,
        RawContent::Image(_) | RawContent::Resource(_)
    )
}

/// Extract a serializable payload from an upstream tool result.
pub fn extract_call_result(result: &CallToolResult) -> Payload {
    let content = &result.content;

    if content.is_empty() {
        return Payload::Value(Value::Null);
    }

    if content.len() == 1 {
        let item = &content[0];
        return match &item.raw {
            RawContent::Text(text) => Payload::Value(unwrap_json_string(&text.text)),
            RawContent::Image(_) | RawContent::Resource(_) => {
                Payload::Multimodal(vec![item.clone()])
            }
            _ => Payload::Value(serde_json::to_value(item).unwrap_or_default()),
        };
    }

    // Any multimodal item keeps the whole list verbatim.
    if content.iter().any(is_multimodal_content) {
        return Payload::Multimodal(content.clone());
    }

    let mut values: Vec<Value> = Vec::with_capacity(content.len());
    for item in content {
        match &item.raw {
            RawContent::Text(text) => values.push(Value::String(text.text.clone())),
            _ => values.push(serde_json::to_value(item).unwrap_or_default()),
        }
    }
    match values.len() {
        0 => Payload::Value(Value::Null),
        1 => Payload::Value(values.remove(0)),
        _ => Payload::Value(Value::Array(values)),
    }
}

/// Decode a text payload, unwrapping one level of double encoding.
///
/// Some upstreams serialize JSON data into a string and then send that string
/// as JSON again (`"\"[{\\\"k\\\":1}]\""`). A first decode yielding a string
/// triggers exactly one more decode attempt; anything that fails to parse is
/// returned as raw text.
pub fn unwrap_json_string(text: &str) -> Value {
    if text.is_empty() {
        return Value::String(String::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => {
            serde_json::from_str::<Value>(&inner).unwrap_or(Value::String(inner))
        }
        Ok(parsed) => parsed,
        Err(_) => Value::String(text.to_string()),
    }
}
