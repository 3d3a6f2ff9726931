//! Compression decisions for tool-call and describe payloads.
//!
//! TOON pays off for homogeneous arrays of records and key-heavy objects; it
//! does nothing for primitives and can hurt on small or irregular data. The
//! analysis here decides whether a value crosses the configured size
//! threshold before handing it to the encoder. Multimodal content never
//! reaches this module: extraction keeps it out of the plain-value path.

use serde_json::Value;

use super::toon;

/// Shape classification used for the compression decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataShape {
    /// Scalar or null.
    Primitive,
    /// Array of objects sharing one key set (or an empty array).
    Array,
    /// Plain object.
    Object,
    /// Any other array.
    Mixed,
}

/// Classify a value for the compression decision.
pub fn detect_data_shape(data: &Value) -> DataShape {
    match data {
        Value::Array(items) => {
            if items.is_empty() {
                return DataShape::Array;
            }
            let mut key_sets = items.iter().map(|item| match item {
                Value::Object(map) => Some(map.keys().collect::<Vec<_>>()),
                _ => None,
            });
            match key_sets.next().flatten() {
                Some(first) => {
                    if key_sets.all(|keys| keys.as_ref() == Some(&first)) {
                        DataShape::Array
                    } else {
                        DataShape::Mixed
                    }
                }
                None => DataShape::Mixed,
            }
        }
        Value::Object(_) => DataShape::Object,
        _ => DataShape::Primitive,
    }
}

/// Whether a value is worth TOON-encoding at the given size threshold.
///
/// Homogeneous arrays and objects compress at `min_size` items/keys; mixed
/// arrays only at twice that, since irregular shapes gain less.
pub fn is_compressible(data: &Value, min_size: usize) -> bool {
    match detect_data_shape(data) {
        DataShape::Primitive => false,
        DataShape::Array => data.as_array().is_some_and(|a| a.len() >= min_size),
        DataShape::Object => data.as_object().is_some_and(|o| o.len() >= min_size),
        DataShape::Mixed => data
            .as_array()
            .is_some_and(|a| a.len() >= min_size.saturating_mul(2)),
    }
}

/// TOON compressor with a configured enable flag and default threshold.
#[derive(Debug, Clone)]
pub struct ToonCompressor {
    enabled: bool,
    min_size: usize,
}

impl ToonCompressor {
    pub const fn new(enabled: bool, min_size: usize) -> Self {
        Self { enabled, min_size }
    }

    /// Compress using the default threshold. Returns the TOON text when the
    /// value crossed the threshold, `None` to keep the original value.
    pub fn compress(&self, data: &Value) -> Option<String> {
        self.compress_with_min(data, self.min_size)
    }

    /// Compress with a caller-supplied threshold (describe responses use a
    /// lower one than call responses).
    pub fn compress_with_min(&self, data: &Value, min_size: usize) -> Option<String> {
        if !self.enabled || !is_compressible(data, min_size) {
            return None;
        }
        Some(toon::encode(data))
    }
}
