pub mod describe;
pub mod tools;

use std::sync::Arc;

use rmcp::ServerHandler;
use rmcp::handler::server::router::Router;
use rmcp::model::{Implementation, ServerCapabilities, ServerInfo};

use crate::manager::ServerManager;

/// The outward MCP server surface.
///
/// Holds a shared reference to the manager plus tool and resource
/// descriptions pre-rendered from the catalog at startup. The adapters in
/// [`tools`] delegate everything else to the manager.
pub struct McpMuxServer {
    pub manager: Arc<ServerManager>,
    /// Pre-rendered `server.tool(params): desc` listing for the invoke tool.
    pub tools_description: String,
    /// Pre-rendered resource listing for the read tool.
    pub resources_description: String,
}

impl McpMuxServer {
    /// Build the server surface from an initialized manager.
    pub fn new(manager: Arc<ServerManager>) -> Self {
        let tools_description = describe::generate_tools_description(&manager);
        let resources_description = describe::generate_resources_description(&manager);
        Self {
            manager,
            tools_description,
            resources_description,
        }
    }

    /// Server info for the MCP initialize response. The description and
    /// instructions name the proxied servers so the LLM knows what this
    /// endpoint federates.
    fn server_info(&self) -> ServerInfo {
        let servers = self.manager.list_servers();
        let description = if servers.is_empty() {
            "MCP multiplexing proxy. No upstream servers are currently connected.".to_string()
        } else {
            format!(
                "MCP multiplexing proxy federating: {}. \
                 One endpoint, every upstream tool.",
                servers.join(", ")
            )
        };

        let instructions = format!(
            "This server proxies multiple MCP servers behind three tools: \
             use describe to inspect a server's tools and schemas, \
             invoke with method=\"server.tool\" to call an upstream tool, \
             and read with server_name and uri to fetch a resource.\n\n{}\n\n{}",
            self.tools_description, self.resources_description
        );

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcpmux".to_string(),
                title: Some("mcpmux".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(description),
                icons: None,
                website_url: None,
            },
            instructions: Some(instructions),
        }
    }

    /// Build a Router wiring the three outward tools to this server.
    pub fn into_router(self: Arc<Self>) -> Router<Arc<Self>> {
        let invoke = tools::invoke_tool(&self);
        let read = tools::read_tool(&self);
        Router::new(self)
            .with_tool(invoke)
            .with_tool(read)
            .with_tool(tools::describe_tool())
    }
}

impl ServerHandler for McpMuxServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::config::{ConfigStore, ProxyConfig};

    fn empty_server() -> McpMuxServer {
        let manager = Arc::new(ServerManager::new(ConfigStore::in_memory(
            ProxyConfig::default(),
        )));
        McpMuxServer::new(manager)
    }

    #[test]
    fn server_info_names_the_tools() {
        let server = empty_server();
        let info = server.server_info();
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("invoke"));
        assert!(instructions.contains("read"));
        assert!(instructions.contains("describe"));
        assert_eq!(info.server_info.name, "mcpmux");
    }

    #[test]
    fn empty_manager_reports_no_upstreams() {
        let server = empty_server();
        let info = server.server_info();
        assert!(
            info.server_info
                .description
                .unwrap()
                .contains("No upstream servers")
        );
    }
}
