//! In-process mock MCP backend for integration testing.
//!
//! Serves a small tool and resource set over `tokio::io::duplex()`, so the
//! full proxy pipeline (pool, catalog, routing, payload handling) runs
//! without spawning external processes. Each factory invocation opens a
//! fresh duplex pair, which makes it usable as a real pool factory.
#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use rmcp::ServerHandler;
use rmcp::handler::server::router::Router;
use rmcp::handler::server::router::tool::ToolRoute;
use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::{
    AnnotateAble, CallToolResult, Content, Implementation, ListResourcesResult,
    PaginatedRequestParams, RawResource, ReadResourceRequestParams, ReadResourceResult, Resource,
    ResourceContents, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};

use mcpmux::config::{ConfigStore, ProxyConfig};
use mcpmux::manager::ServerManager;
use mcpmux::manager::client::{ClientFactory, UpstreamClient};

/// Body of the mock text resource; longer than 100 chars so description
/// backfill has something to truncate.
pub const NOTES_BODY: &str = "The quick brown fox jumps over the lazy dog. \
Pack my box with five dozen liquor jugs. Sphinx of black quartz, judge my vow.";

pub const NOTES_URI: &str = "file:///notes.txt";
pub const LOGO_URI: &str = "file:///logo.png";
pub const EMPTY_URI: &str = "file:///empty";
pub const MULTI_URI: &str = "file:///multi";

// ---- Mock MCP backend ----

#[derive(Clone)]
pub struct MockBackend;

impl ServerHandler for MockBackend {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "mock-backend".to_string(),
                title: Some("Mock Backend".to_string()),
                version: "0.1.0".to_string(),
                ..Default::default()
            },
            instructions: Some("Mock upstream for proxy tests.".to_string()),
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, rmcp::ErrorData>> + Send + '_
    {
        std::future::ready(Ok(ListResourcesResult {
            resources: mock_resources(),
            ..Default::default()
        }))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, rmcp::ErrorData>> + Send + '_
    {
        let result = match request.uri.as_str() {
            NOTES_URI => Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(NOTES_BODY, NOTES_URI)],
            }),
            LOGO_URI => Ok(ReadResourceResult {
                contents: vec![blob_contents(LOGO_URI)],
            }),
            EMPTY_URI => Ok(ReadResourceResult { contents: vec![] }),
            MULTI_URI => Ok(ReadResourceResult {
                contents: vec![
                    ResourceContents::text("part one", MULTI_URI),
                    ResourceContents::text("part two", MULTI_URI),
                ],
            }),
            other => Err(rmcp::ErrorData::invalid_params(
                format!("unknown resource: {other}"),
                None,
            )),
        };
        std::future::ready(result)
    }
}

fn mock_resources() -> Vec<Resource> {
    vec![
        RawResource {
            uri: NOTES_URI.to_string(),
            name: "notes".to_string(),
            title: Some("Notes".to_string()),
            description: None,
            mime_type: Some("text/plain".to_string()),
            size: Some(NOTES_BODY.len().try_into().unwrap()),
            icons: None,
            meta: None,
        }
        .no_annotation(),
        RawResource {
            uri: LOGO_URI.to_string(),
            name: "logo".to_string(),
            title: Some("Logo".to_string()),
            description: Some("Project logo".to_string()),
            mime_type: Some("image/png".to_string()),
            size: None,
            icons: None,
            meta: None,
        }
        .no_annotation(),
        RawResource {
            uri: EMPTY_URI.to_string(),
            name: "empty".to_string(),
            title: None,
            description: Some("Always empty".to_string()),
            mime_type: Some("text/plain".to_string()),
            size: None,
            icons: None,
            meta: None,
        }
        .no_annotation(),
    ]
}

/// Blob contents built from the wire shape, so the struct's exact field set
/// stays rmcp's business.
fn blob_contents(uri: &str) -> ResourceContents {
    serde_json::from_value(serde_json::json!({
        "uri": uri,
        "mimeType": "image/png",
        "blob": "aGVsbG8=",
    }))
    .unwrap()
}

fn make_tool(name: &str, description: &str, schema: serde_json::Value) -> Tool {
    Tool::new(
        Cow::Owned(name.to_string()),
        Cow::Owned(description.to_string()),
        rmcp::model::object(schema),
    )
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

fn echo_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool(
            "echo",
            "Echo back the input text",
            serde_json::json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                }
            }),
        ),
        |mut context: ToolCallContext<'_, MockBackend>| {
            let args = context.arguments.take().unwrap_or_default();
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            std::future::ready(Ok(CallToolResult::success(vec![Content::text(text)]))).boxed()
        },
    )
}

fn read_file_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool(
            "read_file",
            "Read a file from disk",
            serde_json::json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string", "description": "File path to read" }
                }
            }),
        ),
        |mut context: ToolCallContext<'_, MockBackend>| {
            let args = context.arguments.take().unwrap_or_default();
            let path = args
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            std::future::ready(Ok(CallToolResult::success(vec![Content::text(format!(
                "contents of {path}"
            ))])))
            .boxed()
        },
    )
}

fn get_data_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool("get_data", "Return structured JSON data", empty_schema()),
        |_context: ToolCallContext<'_, MockBackend>| {
            std::future::ready(Ok(CallToolResult::success(vec![Content::text(
                r#"{"key":"value"}"#,
            )])))
            .boxed()
        },
    )
}

fn get_records_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool(
            "get_records",
            "Return a homogeneous list of records",
            empty_schema(),
        ),
        |_context: ToolCallContext<'_, MockBackend>| {
            let records = serde_json::json!([
                {"id": 1, "name": "a"},
                {"id": 2, "name": "b"},
                {"id": 3, "name": "c"},
                {"id": 4, "name": "d"},
                {"id": 5, "name": "e"},
            ]);
            let text = serde_json::to_string(&records).unwrap();
            std::future::ready(Ok(CallToolResult::success(vec![Content::text(text)]))).boxed()
        },
    )
}

fn get_image_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool("get_image", "Return an image", empty_schema()),
        |_context: ToolCallContext<'_, MockBackend>| {
            std::future::ready(Ok(CallToolResult::success(vec![Content::image(
                "aGVsbG8=",
                "image/png",
            )])))
            .boxed()
        },
    )
}

fn get_double_encoded_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool(
            "get_double_encoded",
            "Return JSON serialized into a JSON string",
            empty_schema(),
        ),
        |_context: ToolCallContext<'_, MockBackend>| {
            let inner = serde_json::to_string(&serde_json::json!([{"k": 1}])).unwrap();
            let wrapped = serde_json::to_string(&inner).unwrap();
            std::future::ready(Ok(CallToolResult::success(vec![Content::text(wrapped)]))).boxed()
        },
    )
}

fn get_mixed_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool("get_mixed", "Return several text parts", empty_schema()),
        |_context: ToolCallContext<'_, MockBackend>| {
            std::future::ready(Ok(CallToolResult::success(vec![
                Content::text("first"),
                Content::text("second"),
            ])))
            .boxed()
        },
    )
}

fn fail_tool() -> ToolRoute<MockBackend> {
    ToolRoute::new_dyn(
        make_tool("fail", "Always report a tool error", empty_schema()),
        |_context: ToolCallContext<'_, MockBackend>| {
            std::future::ready(Ok(CallToolResult::error(vec![Content::text(
                "deliberate failure",
            )])))
            .boxed()
        },
    )
}

impl MockBackend {
    pub fn into_router(self) -> Router<Self> {
        Router::new(self)
            .with_tool(echo_tool())
            .with_tool(read_file_tool())
            .with_tool(get_data_tool())
            .with_tool(get_records_tool())
            .with_tool(get_image_tool())
            .with_tool(get_double_encoded_tool())
            .with_tool(get_mixed_tool())
            .with_tool(fail_tool())
    }
}

// ---- Factory and manager helpers ----

/// Client factory backed by a fresh duplex-served mock backend per connect.
pub fn mock_factory() -> ClientFactory {
    mock_factory_counted(Arc::new(AtomicUsize::new(0)))
}

/// Same, counting how many connections were actually established.
pub fn mock_factory_counted(counter: Arc<AtomicUsize>) -> ClientFactory {
    ClientFactory::from_connector("mock", move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let (client_stream, server_stream) = tokio::io::duplex(65536);

            tokio::spawn(async move {
                let (server_read, server_write) = tokio::io::split(server_stream);
                if let Ok(service) =
                    rmcp::serve_server(MockBackend.into_router(), (server_read, server_write)).await
                {
                    let _ = service.waiting().await;
                }
            });

            let (client_read, client_write) = tokio::io::split(client_stream);
            let service = rmcp::ServiceExt::serve((), (client_read, client_write))
                .await
                .map_err(|e| anyhow::anyhow!("mock connect failed: {e}"))?;
            Ok(UpstreamClient::from_running_service(service))
        })
    })
}

/// Manager with the mock backend connected as `"mock"`.
pub async fn connected_manager() -> Arc<ServerManager> {
    connected_manager_with(ProxyConfig::default()).await
}

pub async fn connected_manager_with(config: ProxyConfig) -> Arc<ServerManager> {
    let manager = Arc::new(ServerManager::new(ConfigStore::in_memory(config)));
    manager
        .connect_with_factory("mock", mock_factory())
        .await
        .unwrap();
    manager
}

// ---- Result helpers ----

pub fn first_text(result: &CallToolResult) -> Option<String> {
    result
        .content
        .iter()
        .find_map(|c| c.as_text().map(|t| t.text.clone()))
}

/// Parse the in-band JSON text of a result (envelopes and JSON payloads).
pub fn parse_json(result: &CallToolResult) -> serde_json::Value {
    serde_json::from_str(&first_text(result).unwrap()).unwrap()
}
