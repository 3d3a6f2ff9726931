use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ReadResourceRequestParams, ReadResourceResult, Resource,
    Tool,
};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};

use crate::config::{McpServerConfig, TransportKind};

/// Resolved transport for connecting to one upstream MCP server.
///
/// Produced from a validated [`McpServerConfig`]; the variants carry exactly
/// the fields their transport needs.
#[derive(Debug, Clone)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportSpec {
    /// Resolve from a validated config entry.
    pub fn from_config(name: &str, config: &McpServerConfig) -> anyhow::Result<Self> {
        config.validate(name)?;
        match config.kind {
            TransportKind::Stdio => {
                let command = config
                    .command
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("server '{name}': missing command"))?;
                Ok(Self::Stdio {
                    command,
                    args: config.args.clone(),
                    env: config.env.clone().unwrap_or_default(),
                })
            }
            TransportKind::Http => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("server '{name}': missing url"))?;
                Ok(Self::Http {
                    url,
                    headers: config.headers.clone().unwrap_or_default(),
                })
            }
        }
    }
}

/// Type-erased wrapper around the transport-specific `RunningService`.
///
/// rmcp's `RunningService` is generic over the transport, so a stdio service
/// and an HTTP service are different concrete types. This enum stores either
/// variant behind one handle while exposing the common `Peer<RoleClient>`.
enum ServiceHandle {
    Stdio(RunningService<RoleClient, ()>),
    Http(RunningService<RoleClient, ()>),
}

impl ServiceHandle {
    #[allow(clippy::match_same_arms)]
    fn peer(&self) -> &Peer<RoleClient> {
        match self {
            Self::Stdio(s) => s.peer(),
            Self::Http(s) => s.peer(),
        }
    }

    #[allow(clippy::match_same_arms)]
    fn is_closed(&self) -> bool {
        match self {
            Self::Stdio(s) => s.is_closed(),
            Self::Http(s) => s.is_closed(),
        }
    }

    #[allow(clippy::match_same_arms)]
    fn peer_info(&self) -> Option<&rmcp::model::ServerInfo> {
        match self {
            Self::Stdio(s) => s.peer_info(),
            Self::Http(s) => s.peer_info(),
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Stdio(s) | Self::Http(s) => {
                let _ = s.close().await;
            }
        }
    }
}

/// One live, initialized connection to an upstream MCP server.
///
/// Clients are produced by a [`ClientFactory`], owned by a connection pool,
/// and must not be shared across concurrent callers.
pub struct UpstreamClient {
    service: ServiceHandle,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("closed", &self.service.is_closed())
            .finish()
    }
}

impl UpstreamClient {
    /// Wrap a pre-connected `RunningService`.
    ///
    /// Used by in-process test backends (e.g. over `tokio::io::duplex`).
    pub fn from_running_service(service: RunningService<RoleClient, ()>) -> Self {
        Self {
            service: ServiceHandle::Stdio(service),
        }
    }

    /// The upstream's initialize-time identity, if the handshake recorded one.
    pub fn server_info(&self) -> Option<&rmcp::model::ServerInfo> {
        self.service.peer_info()
    }

    pub fn is_closed(&self) -> bool {
        self.service.is_closed()
    }

    /// List all tools, following pagination.
    pub async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        self.service
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| anyhow::anyhow!("tools/list failed: {e}"))
    }

    /// List all resources, following pagination.
    pub async fn list_resources(&self) -> anyhow::Result<Vec<Resource>> {
        self.service
            .peer()
            .list_all_resources()
            .await
            .map_err(|e| anyhow::anyhow!("resources/list failed: {e}"))
    }

    /// Read one resource by URI.
    pub async fn read_resource(&self, uri: &str) -> anyhow::Result<ReadResourceResult> {
        self.service
            .peer()
            .read_resource(ReadResourceRequestParams {
                meta: None,
                uri: uri.to_string(),
            })
            .await
            .map_err(|e| anyhow::anyhow!("resources/read failed: {e}"))
    }

    /// Call a tool. Returns the raw `ServiceError` so callers can tell
    /// transport failures from in-band tool errors.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, ServiceError> {
        self.service
            .peer()
            .call_tool(CallToolRequestParams {
                meta: None,
                name: tool_name.to_string().into(),
                arguments,
                task: None,
            })
            .await
    }

    /// Lightweight liveness probe.
    ///
    /// The client peer has no dedicated ping request, so a single
    /// (unpaginated) `tools/list` round-trip stands in: it is cheap and fails
    /// when the transport is dead.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.service
            .peer()
            .list_tools(Default::default())
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("ping probe failed: {e}"))
    }

    /// Shut the connection down, ignoring shutdown errors.
    pub async fn close(&mut self) {
        self.service.close().await;
    }
}

/// Determine whether a `ServiceError` indicates a transport-level failure
/// (as opposed to a normal MCP error response).
pub const fn is_transport_error(e: &ServiceError) -> bool {
    matches!(
        e,
        ServiceError::TransportSend(_) | ServiceError::TransportClosed
    )
}

type ConnectFn =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<UpstreamClient>> + Send + Sync + 'static>;

/// Factory producing fresh connected clients for one upstream server.
///
/// Each invocation spawns a new transport (subprocess or HTTP session) and
/// runs the MCP handshake. The connection pool holds one factory per server
/// and calls it whenever it needs a new client under capacity.
#[derive(Clone)]
pub struct ClientFactory {
    name: String,
    connect: ConnectFn,
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("server", &self.name)
            .finish()
    }
}

impl ClientFactory {
    /// Factory from a resolved transport spec.
    pub fn from_spec(name: &str, spec: TransportSpec) -> Self {
        let server_name = name.to_string();
        let connect: ConnectFn = Arc::new(move || {
            let spec = spec.clone();
            let server_name = server_name.clone();
            Box::pin(async move { connect_transport(&server_name, &spec).await })
        });
        Self {
            name: name.to_string(),
            connect,
        }
    }

    /// Factory from an arbitrary connector closure.
    ///
    /// Lets tests back a server with in-process duplex transports.
    pub fn from_connector<F>(name: &str, connector: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<UpstreamClient>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            connect: Arc::new(connector),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.name
    }

    /// Connect a fresh client and complete the MCP handshake.
    pub async fn connect(&self) -> anyhow::Result<UpstreamClient> {
        (self.connect)().await
    }
}

/// Connect to a single upstream MCP server and wrap its service handle.
async fn connect_transport(name: &str, spec: &TransportSpec) -> anyhow::Result<UpstreamClient> {
    match spec {
        TransportSpec::Stdio { command, args, env } => {
            let args_clone = args.clone();
            let env_clone = env.clone();
            let transport = TokioChildProcess::new(
                tokio::process::Command::new(command).configure(move |cmd| {
                    cmd.args(&args_clone);
                    for (k, v) in &env_clone {
                        cmd.env(k, v);
                    }
                }),
            )
            .map_err(|e| anyhow::anyhow!("failed to spawn process for '{name}': {e}"))?;
            let service = ()
                .serve(transport)
                .await
                .map_err(|e| anyhow::anyhow!("failed to initialize '{name}' (stdio): {e}"))?;
            Ok(UpstreamClient {
                service: ServiceHandle::Stdio(service),
            })
        }
        TransportSpec::Http { url, headers } => {
            let transport = if headers.is_empty() {
                StreamableHttpClientTransport::from_uri(url.as_str())
            } else {
                let mut header_map = reqwest::header::HeaderMap::new();
                for (key, value) in headers {
                    let header_name =
                        reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                            anyhow::anyhow!("server '{name}': invalid header name '{key}': {e}")
                        })?;
                    let header_value = reqwest::header::HeaderValue::from_str(value)
                        .map_err(|e| {
                            anyhow::anyhow!("server '{name}': invalid header value for '{key}': {e}")
                        })?;
                    header_map.insert(header_name, header_value);
                }
                let client = reqwest::Client::builder()
                    .default_headers(header_map)
                    .build()
                    .map_err(|e| anyhow::anyhow!("failed to build HTTP client for '{name}': {e}"))?;
                StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                )
            };
            let service = ()
                .serve(transport)
                .await
                .map_err(|e| anyhow::anyhow!("failed to initialize '{name}' (http): {e}"))?;
            Ok(UpstreamClient {
                service: ServiceHandle::Http(service),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::config::{McpServerConfig, TransportKind};

    fn base_config() -> McpServerConfig {
        McpServerConfig {
            kind: TransportKind::Stdio,
            command: None,
            args: vec![],
            env: None,
            url: None,
            headers: None,
            enabled: true,
        }
    }

    #[test]
    fn resolve_stdio_spec() {
        let mut config = base_config();
        config.command = Some("npx".to_string());
        config.args = vec!["-y".to_string(), "server-fs".to_string()];
        config.env = Some(HashMap::from([("FOO".to_string(), "bar".to_string())]));

        let spec = TransportSpec::from_config("fs", &config).unwrap();
        match spec {
            TransportSpec::Stdio { command, args, env } => {
                assert_eq!(command, "npx");
                assert_eq!(args, vec!["-y", "server-fs"]);
                assert_eq!(env.get("FOO").unwrap(), "bar");
            }
            TransportSpec::Http { .. } => panic!("expected stdio spec"),
        }
    }

    #[test]
    fn resolve_http_spec() {
        let mut config = base_config();
        config.kind = TransportKind::Http;
        config.url = Some("https://mcp.example.com/mcp".to_string());

        let spec = TransportSpec::from_config("remote", &config).unwrap();
        match spec {
            TransportSpec::Http { url, headers } => {
                assert_eq!(url, "https://mcp.example.com/mcp");
                assert!(headers.is_empty());
            }
            TransportSpec::Stdio { .. } => panic!("expected http spec"),
        }
    }

    #[test]
    fn resolve_rejects_incomplete_config() {
        let config = base_config();
        assert!(TransportSpec::from_config("fs", &config).is_err());

        let mut http = base_config();
        http.kind = TransportKind::Http;
        assert!(TransportSpec::from_config("remote", &http).is_err());
    }

    #[tokio::test]
    async fn factory_connect_failure_surfaces_error() {
        let spec = TransportSpec::Stdio {
            command: "/nonexistent/binary/that/does/not/exist".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let factory = ClientFactory::from_spec("bad", spec);
        assert!(factory.connect().await.is_err());
    }

    #[test]
    fn transport_error_classification() {
        assert!(is_transport_error(&ServiceError::TransportClosed));
        assert!(!is_transport_error(&ServiceError::UnexpectedResponse));
    }
}
