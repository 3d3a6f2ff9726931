mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use tracing::info;

use mcpmux::config::ConfigStore;
use mcpmux::manager::ServerManager;
use mcpmux::server::McpMuxServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("config.json"));

    let store = ConfigStore::load(config_path.clone())?;
    info!(
        servers = store.config().mcp_servers.len(),
        config = %config_path.display(),
        "loaded config"
    );

    let manager = Arc::new(ServerManager::new(store));
    info!("initializing MCP server connections...");
    manager.initialize().await;
    info!(
        connected = manager.list_servers().len(),
        tools = manager.list_all_tools().len(),
        resources = manager.list_all_resources().len(),
        "upstream catalog ready"
    );

    let server = Arc::new(McpMuxServer::new(Arc::clone(&manager)));
    serve_http(server, &cli.host, cli.port).await?;

    info!("shutting down MCP server connections...");
    manager.close().await;
    Ok(())
}

/// Serve the outward MCP surface over streamable HTTP.
async fn serve_http(server: Arc<McpMuxServer>, host: &str, port: u16) -> anyhow::Result<()> {
    use rmcp::transport::streamable_http_server::{
        StreamableHttpServerConfig, StreamableHttpService,
    };
    use tokio_util::sync::CancellationToken;

    let ct = CancellationToken::new();
    let config = StreamableHttpServerConfig {
        stateful_mode: true,
        cancellation_token: ct.child_token(),
        ..Default::default()
    };

    let service: StreamableHttpService<
        rmcp::handler::server::router::Router<Arc<McpMuxServer>>,
    > = StreamableHttpService::new(
        {
            let server = Arc::clone(&server);
            move || Ok(Arc::clone(&server).into_router())
        },
        Arc::default(),
        config,
    );

    let app = axum::Router::new().nest_service("/mcp", service);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("MCP server listening on http://{addr}/mcp");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            ct.cancel();
        })
        .await?;

    Ok(())
}
