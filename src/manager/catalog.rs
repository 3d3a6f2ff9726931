use rmcp::model::{Resource, Tool};
use serde_json::Value;

/// Identity an upstream reported during the MCP handshake.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    /// Config name (user-defined).
    pub name: String,
    /// Name the server reported about itself.
    pub server_name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl ServerIdentity {
    /// Identity for servers whose handshake carried no usable info.
    pub fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            server_name: name.to_string(),
            version: "unknown".to_string(),
            instructions: None,
        }
    }
}

/// Cached tool schema, stored verbatim as received.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub server_name: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn from_tool(server_name: &str, tool: &Tool) -> Self {
        Self {
            server_name: server_name.to_string(),
            name: tool.name.to_string(),
            description: tool
                .description
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        }
    }

    /// Outward method identifier, `"{server}.{tool}"`.
    pub fn method(&self) -> String {
        format!("{}.{}", self.server_name, self.name)
    }
}

/// Cached resource descriptor.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub server_name: String,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

impl ResourceDescriptor {
    pub fn from_resource(server_name: &str, resource: &Resource) -> Self {
        Self {
            server_name: server_name.to_string(),
            uri: resource.uri.to_string(),
            name: resource.name.to_string(),
            description: resource.description.as_ref().map(ToString::to_string),
            mime_type: resource.mime_type.as_ref().map(ToString::to_string),
            size: resource.size.and_then(|s| u64::try_from(s).ok()),
        }
    }

    /// Whether the resource body is text we can preview for a description.
    pub fn has_textual_mime(&self) -> bool {
        self.mime_type.as_deref().is_some_and(|mime| {
            mime.starts_with("text/") || mime == "application/json"
        })
    }
}

/// Everything cached about one connected server: identity, tools, resources.
///
/// Pure data, installed atomically at connect time and dropped wholesale at
/// disconnect. Reads never touch the upstream; staleness between connects is
/// accepted.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub identity: ServerIdentity,
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
}

impl CatalogEntry {
    pub fn get_tool(&self, tool_name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == tool_name)
    }

    pub fn get_resource(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.uri == uri)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}
