use serde_json::{Value, json};
use thiserror::Error;

/// Typed failures surfaced on the outward `invoke`/`read`/`describe` surface.
///
/// Every variant carries a stable code plus the context needed to render the
/// in-band JSON envelope (`{"error": ..., "code": ..., ...context}`). Errors
/// are always returned in-band as text content; nothing is thrown across the
/// MCP boundary.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Server '{server}' not found{}", available_suffix(available))]
    ServerNotFound {
        server: String,
        available: Vec<String>,
    },

    #[error("Tool '{tool}' not found on server '{server}'{}", available_suffix(available))]
    ToolNotFound {
        server: String,
        tool: String,
        available: Vec<String>,
    },

    #[error("Tool '{server}.{tool}' is disabled")]
    ToolDisabled { server: String, tool: String },

    #[error("Argument validation failed: {message}")]
    Validation {
        message: String,
        schema: Option<Value>,
    },

    #[error("Resource '{uri}' not found on server '{server}'")]
    ResourceNotFound { server: String, uri: String },

    #[error("Error executing '{server}.{tool}': {message}")]
    Execution {
        server: String,
        tool: String,
        message: String,
    },

    #[error("{message}")]
    Unexpected { message: String },
}

fn available_suffix(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(". Available: {available:?}")
    }
}

impl MuxError {
    /// Stable machine-readable code for the envelope.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ServerNotFound { .. } => "SERVER_NOT_FOUND",
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::ToolDisabled { .. } => "TOOL_DISABLED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::Unexpected { .. } => "UNEXPECTED_ERROR",
        }
    }

    /// Render the in-band JSON envelope for this error.
    ///
    /// The envelope always holds `error` and `code`; variant-specific context
    /// keys (`available_servers`, `available_tools`, `hint`, `tool_schema`)
    /// are added when present.
    pub fn to_envelope(&self) -> Value {
        let mut envelope = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        // Envelope root is always an object; the match below fills context.
        if let Value::Object(map) = &mut envelope {
            match self {
                Self::ServerNotFound { available, .. } => {
                    if available.is_empty() {
                        map.insert(
                            "hint".to_string(),
                            Value::String("No MCP servers are currently connected".to_string()),
                        );
                    } else {
                        map.insert("available_servers".to_string(), json!(available));
                    }
                }
                Self::ToolNotFound { available, .. } => {
                    if !available.is_empty() {
                        map.insert("available_tools".to_string(), json!(available));
                    }
                }
                Self::Validation {
                    schema: Some(schema),
                    ..
                } => {
                    map.insert("tool_schema".to_string(), schema.clone());
                }
                _ => {}
            }
        }
        envelope
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn server_not_found_no_servers_has_hint() {
        let err = MuxError::ServerNotFound {
            server: "x".to_string(),
            available: vec![],
        };
        let env = err.to_envelope();
        assert_eq!(env["error"], "Server 'x' not found");
        assert_eq!(env["code"], "SERVER_NOT_FOUND");
        assert_eq!(env["hint"], "No MCP servers are currently connected");
        assert!(env.get("available_servers").is_none());
    }

    #[test]
    fn server_not_found_lists_available() {
        let err = MuxError::ServerNotFound {
            server: "x".to_string(),
            available: vec!["fs".to_string(), "web".to_string()],
        };
        let env = err.to_envelope();
        assert!(
            env["error"].as_str().unwrap().contains("Available"),
            "message should name available servers: {env}"
        );
        assert_eq!(env["available_servers"], json!(["fs", "web"]));
        assert!(env.get("hint").is_none());
    }

    #[test]
    fn tool_not_found_lists_tools() {
        let err = MuxError::ToolNotFound {
            server: "fs".to_string(),
            tool: "nope".to_string(),
            available: vec!["read_file".to_string()],
        };
        let env = err.to_envelope();
        assert_eq!(env["code"], "TOOL_NOT_FOUND");
        assert_eq!(env["available_tools"], json!(["read_file"]));
        assert!(env["error"].as_str().unwrap().contains("'nope'"));
        assert!(env["error"].as_str().unwrap().contains("'fs'"));
    }

    #[test]
    fn validation_error_carries_schema() {
        let schema = json!({"type": "object", "required": ["path"]});
        let err = MuxError::Validation {
            message: "Missing required argument: 'path'".to_string(),
            schema: Some(schema.clone()),
        };
        let env = err.to_envelope();
        assert_eq!(env["code"], "VALIDATION_ERROR");
        assert_eq!(env["tool_schema"], schema);
        assert!(
            env["error"]
                .as_str()
                .unwrap()
                .starts_with("Argument validation failed:")
        );
    }

    #[test]
    fn execution_error_message_names_method() {
        let err = MuxError::Execution {
            server: "fs".to_string(),
            tool: "read_file".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Error executing 'fs.read_file': boom");
        assert_eq!(err.code(), "EXECUTION_ERROR");
    }

    #[test]
    fn disabled_and_resource_codes() {
        let disabled = MuxError::ToolDisabled {
            server: "fs".to_string(),
            tool: "rm".to_string(),
        };
        assert_eq!(disabled.code(), "TOOL_DISABLED");

        let missing = MuxError::ResourceNotFound {
            server: "fs".to_string(),
            uri: "file:///nope".to_string(),
        };
        assert_eq!(missing.code(), "RESOURCE_NOT_FOUND");
        assert_eq!(
            missing.to_string(),
            "Resource 'file:///nope' not found on server 'fs'"
        );
    }
}
