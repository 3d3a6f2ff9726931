use std::borrow::Cow;
use std::sync::Arc;

use futures::FutureExt;
use rmcp::handler::server::router::tool::ToolRoute;
use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::{CallToolResult, Content, Tool};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::error;

use crate::error::MuxError;
use crate::payload::Payload;
use crate::payload::schema_ts::json_schema_to_typescript;

use super::McpMuxServer;

/// Description length cap when rendering schemas into diagnostic text.
const SCHEMA_DESC_MAX: usize = 300;

// ---- Tool parameter structs ----

#[derive(Deserialize)]
struct InvokeParams {
    method: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ReadParams {
    server_name: String,
    uri: String,
}

#[derive(Deserialize)]
struct DescribeParams {
    method: String,
}

// ---- Method parsing ----

/// Split a method identifier on its first dot: `"a.b.c"` → `("a", "b.c")`.
///
/// A trailing dot yields an empty tool name; no special-casing here.
pub fn parse_method(method: &str) -> Option<(&str, &str)> {
    method.split_once('.')
}

// ---- Envelope rendering ----

fn json_text(value: &Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string(value).unwrap_or_default(),
    )])
}

/// Render a typed error as an in-band JSON envelope, compressing the
/// attached tool schema to TypeScript when configured. Renderer failures
/// fall back to the raw schema; they never fail the error path.
fn error_envelope(server: &McpMuxServer, err: &MuxError) -> CallToolResult {
    let mut envelope = err.to_envelope();
    let compress_schemas = server
        .manager
        .with_store(|s| s.config().schema_compression_enabled);
    if compress_schemas
        && let Some(schema) = envelope.get("tool_schema").cloned()
        && schema.is_object()
    {
        envelope["tool_schema"] = Value::String(json_schema_to_typescript(&schema, SCHEMA_DESC_MAX));
    }
    json_text(&envelope)
}

// ---- invoke ----

/// Implementation for `invoke`: parse the method, route the call, shape the
/// result envelope. Every failure comes back as in-band JSON text.
pub async fn invoke_impl(
    server: &McpMuxServer,
    method: &str,
    arguments: Option<Map<String, Value>>,
) -> CallToolResult {
    let Some((server_name, tool_name)) = parse_method(method) else {
        return json_text(&json!({
            "error": format!("Invalid method format: '{method}'. Expected 'server.tool'"),
        }));
    };

    match server.manager.call(server_name, tool_name, arguments).await {
        Ok(outcome) => {
            let include_structured = server
                .manager
                .with_store(|s| s.config().include_structured_content);
            match outcome.payload {
                // Multimodal content goes back verbatim
                Payload::Multimodal(items) => CallToolResult::success(items),
                Payload::Value(raw) => {
                    let text = outcome.compressed.unwrap_or_else(|| match &raw {
                        Value::String(s) => s.clone(),
                        other => serde_json::to_string(other).unwrap_or_default(),
                    });
                    let mut result = CallToolResult::success(vec![Content::text(text)]);
                    if include_structured {
                        result.structured_content = Some(json!({"result": raw}));
                    }
                    result
                }
            }
        }
        Err(err) => error_envelope(server, &err),
    }
}

// ---- read ----

/// Implementation for `read`: fetch a resource and normalize its contents.
///
/// Single text content returns the text itself; single binary content
/// returns a `{uri, mime_type, blob}` record; multiple contents return a
/// list of per-item records.
pub async fn read_impl(server: &McpMuxServer, server_name: &str, uri: &str) -> CallToolResult {
    use rmcp::model::ResourceContents;

    let result = match server.manager.read(server_name, uri).await {
        Ok(result) => result,
        Err(err) => return error_envelope(server, &err),
    };

    if result.contents.len() == 1 {
        match &result.contents[0] {
            ResourceContents::TextResourceContents { text, .. } => {
                return CallToolResult::success(vec![Content::text(text.clone())]);
            }
            ResourceContents::BlobResourceContents {
                uri,
                mime_type,
                blob,
                ..
            } => {
                return json_text(&json!({
                    "uri": uri,
                    "mime_type": mime_type,
                    "blob": blob,
                }));
            }
        }
    }

    let records: Vec<Value> = result
        .contents
        .iter()
        .map(|content| match content {
            ResourceContents::TextResourceContents { uri, text, .. } => {
                json!({"uri": uri, "text": text})
            }
            ResourceContents::BlobResourceContents {
                uri,
                mime_type,
                blob,
                ..
            } => json!({"uri": uri, "mime_type": mime_type, "blob": blob}),
        })
        .collect();
    json_text(&Value::Array(records))
}

// ---- describe ----

/// Implementation for `describe`: catalog lookups only, no upstream traffic.
///
/// `method` is either `"server"` (all tools of that server, in catalog
/// order) or `"server.tool"` (one record). A trailing dot counts as the
/// server-only form.
pub fn describe_impl(server: &McpMuxServer, method: &str) -> CallToolResult {
    let (server_name, tool_name) = match parse_method(method) {
        Some((s, t)) if !t.is_empty() => (s, Some(t)),
        Some((s, _)) => (s, None),
        None => (method, None),
    };

    if !server.manager.has_server(server_name) {
        return error_envelope(
            server,
            &MuxError::ServerNotFound {
                server: server_name.to_string(),
                available: server.manager.list_servers(),
            },
        );
    }

    let compress_schemas = server
        .manager
        .with_store(|s| s.config().schema_compression_enabled);
    let render_schema = |schema: &Value| {
        if compress_schemas {
            Value::String(json_schema_to_typescript(schema, SCHEMA_DESC_MAX))
        } else {
            schema.clone()
        }
    };

    let value = match tool_name {
        None => {
            let records: Vec<Value> = server
                .manager
                .list_tools(server_name)
                .iter()
                .map(|tool| {
                    json!({
                        "method": tool.method(),
                        "description": tool.description,
                        "input_schema": render_schema(&tool.input_schema),
                    })
                })
                .collect();
            Value::Array(records)
        }
        Some(tool_name) => match server.manager.get_tool(server_name, tool_name) {
            Some(tool) => json!({
                "method": tool.method(),
                "description": tool.description,
                "input_schema": render_schema(&tool.input_schema),
            }),
            None => {
                return error_envelope(
                    server,
                    &MuxError::ToolNotFound {
                        server: server_name.to_string(),
                        tool: tool_name.to_string(),
                        available: server
                            .manager
                            .list_tools(server_name)
                            .iter()
                            .map(|t| t.name.clone())
                            .collect(),
                    },
                );
            }
        },
    };

    // Describe output compresses at its own (lower) threshold
    server.manager.compress_describe(&value).map_or_else(
        || json_text(&value),
        |toon| CallToolResult::success(vec![Content::text(toon)]),
    )
}

// ---- Tool route builders (wired into MCP) ----

fn make_tool(name: &str, description: &str, schema: Value) -> Tool {
    Tool::new(
        Cow::Owned(name.to_string()),
        Cow::Owned(description.to_string()),
        rmcp::model::object(schema),
    )
}

pub fn invoke_tool(server: &McpMuxServer) -> ToolRoute<Arc<McpMuxServer>> {
    let description = format!(
        "Invoke an MCP tool through the proxy. `method` is \"server.tool\"; \
         `arguments` must match the tool's input schema. \
         On failure the result is a JSON error envelope with a stable code and \
         context such as available_servers, available_tools, or tool_schema.\n\n{}",
        server.tools_description
    );
    ToolRoute::new_dyn(
        make_tool(
            "invoke",
            &description,
            json!({
                "type": "object",
                "properties": {
                    "method": {
                        "type": "string",
                        "description": "Method identifier in \"server.tool\" format"
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Tool arguments"
                    },
                },
                "required": ["method"],
            }),
        ),
        |mut context: ToolCallContext<'_, Arc<McpMuxServer>>| {
            let args = context.arguments.take().unwrap_or_default();
            let params: Result<InvokeParams, _> = serde_json::from_value(Value::Object(args));
            invoke_async(params, context.service).boxed()
        },
    )
}

async fn invoke_async(
    params: Result<InvokeParams, serde_json::Error>,
    server: &McpMuxServer,
) -> Result<CallToolResult, rmcp::ErrorData> {
    match params {
        Ok(p) => Ok(invoke_impl(server, &p.method, p.arguments).await),
        Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
            "Invalid params: {e}"
        ))])),
    }
}

pub fn read_tool(server: &McpMuxServer) -> ToolRoute<Arc<McpMuxServer>> {
    let description = format!(
        "Read a resource from a proxied MCP server by URI. Text resources \
         return their text; binary resources return {{uri, mime_type, blob}}.\n\n{}",
        server.resources_description
    );
    ToolRoute::new_dyn(
        make_tool(
            "read",
            &description,
            json!({
                "type": "object",
                "properties": {
                    "server_name": { "type": "string", "description": "Server name" },
                    "uri": { "type": "string", "description": "Resource URI" },
                },
                "required": ["server_name", "uri"],
            }),
        ),
        |mut context: ToolCallContext<'_, Arc<McpMuxServer>>| {
            let args = context.arguments.take().unwrap_or_default();
            let params: Result<ReadParams, _> = serde_json::from_value(Value::Object(args));
            read_async(params, context.service).boxed()
        },
    )
}

async fn read_async(
    params: Result<ReadParams, serde_json::Error>,
    server: &McpMuxServer,
) -> Result<CallToolResult, rmcp::ErrorData> {
    match params {
        Ok(p) => Ok(read_impl(server, &p.server_name, &p.uri).await),
        Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
            "Invalid params: {e}"
        ))])),
    }
}

pub fn describe_tool() -> ToolRoute<Arc<McpMuxServer>> {
    ToolRoute::new_dyn(
        make_tool(
            "describe",
            "Describe proxied tools. `method` is a server name for all of its \
             tools, or \"server.tool\" for one tool's schema.",
            json!({
                "type": "object",
                "properties": {
                    "method": {
                        "type": "string",
                        "description": "Server name or \"server.tool\""
                    },
                },
                "required": ["method"],
            }),
        ),
        |mut context: ToolCallContext<'_, Arc<McpMuxServer>>| {
            let args = context.arguments.take().unwrap_or_default();
            let params: Result<DescribeParams, _> = serde_json::from_value(Value::Object(args));
            let result = match params {
                Ok(p) => describe_impl(context.service, &p.method),
                Err(e) => {
                    error!(error = %e, "invalid describe params");
                    CallToolResult::error(vec![Content::text(format!("Invalid params: {e}"))])
                }
            };
            std::future::ready(Ok(result)).boxed()
        },
    )
}
