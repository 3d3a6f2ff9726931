use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Transport used to reach an upstream MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

/// Configuration for one upstream MCP server (stdio subprocess or HTTP).
///
/// Unknown `type` values are rejected during deserialization, so a config
/// file naming an unsupported transport fails at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(rename = "type", default)]
    pub kind: TransportKind,

    // stdio transport fields
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    // http transport fields
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl McpServerConfig {
    /// Validate that the fields required by the transport kind are present.
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        match self.kind {
            TransportKind::Stdio => {
                if self.command.as_deref().is_none_or(str::is_empty) {
                    anyhow::bail!("server '{name}': stdio type requires a non-empty 'command'");
                }
            }
            TransportKind::Http => {
                if self.url.as_deref().is_none_or(str::is_empty) {
                    anyhow::bail!("server '{name}': http type requires a non-empty 'url'");
                }
            }
        }
        Ok(())
    }
}

/// Top-level proxy configuration.
///
/// Unknown top-level keys are ignored so configs can carry extra metadata
/// without failing load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,

    /// Tools rejected at the router, as `"server.tool"` keys.
    #[serde(default)]
    pub disabled_tools: Vec<String>,

    // Health check knobs
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,
    /// Seconds between health check cycles.
    #[serde(default = "default_health_interval")]
    pub health_check_interval: u64,
    /// Per-probe timeout in seconds.
    #[serde(default = "default_health_timeout")]
    pub health_check_timeout: u64,
    /// Consecutive failures before a server is marked unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub health_check_failure_threshold: u32,

    // TOON compression knobs
    #[serde(default = "default_true")]
    pub toon_compression_enabled: bool,
    /// Minimum items/keys before call responses are compressed.
    #[serde(default = "default_call_min_size")]
    pub toon_compression_min_size: usize,
    /// Minimum items/keys before describe responses are compressed.
    #[serde(default = "default_describe_min_size")]
    pub toon_describe_min_size: usize,

    /// Render input schemas in error envelopes as compact TypeScript.
    #[serde(default = "default_true")]
    pub schema_compression_enabled: bool,

    /// Dual-encode compressed responses with the raw value attached as
    /// structured content.
    #[serde(default)]
    pub include_structured_content: bool,

    /// Maximum clients per upstream connection pool.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
}

const fn default_true() -> bool {
    true
}
const fn default_health_interval() -> u64 {
    30
}
const fn default_health_timeout() -> u64 {
    5
}
const fn default_failure_threshold() -> u32 {
    2
}
const fn default_call_min_size() -> usize {
    3
}
const fn default_describe_min_size() -> usize {
    1
}
const fn default_pool_max_size() -> usize {
    10
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mcp_servers: HashMap::new(),
            disabled_tools: Vec::new(),
            health_check_enabled: true,
            health_check_interval: default_health_interval(),
            health_check_timeout: default_health_timeout(),
            health_check_failure_threshold: default_failure_threshold(),
            toon_compression_enabled: true,
            toon_compression_min_size: default_call_min_size(),
            toon_describe_min_size: default_describe_min_size(),
            schema_compression_enabled: true,
            include_structured_content: false,
            pool_max_size: default_pool_max_size(),
        }
    }
}

/// Read and parse a JSON config file, validating every server entry.
pub fn load_config(path: &Path) -> anyhow::Result<ProxyConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let config: ProxyConfig = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
    for (name, server) in &config.mcp_servers {
        server.validate(name)?;
    }
    Ok(config)
}

/// Holder for the configuration tree with mutation tracking.
///
/// The store is passive: enabling or disabling a server here does not
/// connect or disconnect anything. The `ServerManager` reacts to store
/// changes on the connect/disconnect/reload paths.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: ProxyConfig,
    modified: bool,
}

impl ConfigStore {
    /// Store backed by a config file on disk.
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let config = load_config(&path)?;
        Ok(Self {
            path: Some(path),
            config,
            modified: false,
        })
    }

    /// Store holding an in-memory config, with no persistence path.
    pub const fn in_memory(config: ProxyConfig) -> Self {
        Self {
            path: None,
            config,
            modified: false,
        }
    }

    pub const fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persist the current config to its backing file.
    pub fn save(&mut self) -> anyhow::Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("config store has no backing file"))?;
        let data = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(path, data)
            .map_err(|e| anyhow::anyhow!("failed to write config file {}: {e}", path.display()))?;
        self.modified = false;
        Ok(())
    }

    pub fn get_server(&self, name: &str) -> Option<&McpServerConfig> {
        self.config.mcp_servers.get(name)
    }

    pub fn add_server(&mut self, name: String, server: McpServerConfig) {
        self.config.mcp_servers.insert(name, server);
        self.modified = true;
    }

    pub fn remove_server(&mut self, name: &str) -> bool {
        let removed = self.config.mcp_servers.remove(name).is_some();
        if removed {
            self.modified = true;
        }
        removed
    }

    /// Flip a server's enabled flag. Returns false for unknown servers.
    pub fn set_server_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.config.mcp_servers.get_mut(name) {
            Some(server) => {
                if server.enabled != enabled {
                    server.enabled = enabled;
                    self.modified = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn is_server_enabled(&self, name: &str) -> bool {
        self.config
            .mcp_servers
            .get(name)
            .is_some_and(|s| s.enabled)
    }

    pub fn is_tool_disabled(&self, tool_key: &str) -> bool {
        self.config.disabled_tools.iter().any(|k| k == tool_key)
    }

    pub fn disable_tool(&mut self, tool_key: &str) {
        if !self.is_tool_disabled(tool_key) {
            self.config.disabled_tools.push(tool_key.to_string());
            self.modified = true;
        }
    }

    pub fn enable_tool(&mut self, tool_key: &str) {
        let before = self.config.disabled_tools.len();
        self.config.disabled_tools.retain(|k| k != tool_key);
        if self.config.disabled_tools.len() != before {
            self.modified = true;
        }
    }

    pub fn disabled_tools(&self) -> Vec<String> {
        self.config.disabled_tools.clone()
    }

    /// Disabled tool names (without the server prefix) for one server.
    pub fn server_disabled_tools(&self, server_name: &str) -> Vec<String> {
        let prefix = format!("{server_name}.");
        self.config
            .disabled_tools
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(String::from)
            .collect()
    }

    /// Apply a new configuration wholesale.
    ///
    /// Runtime knobs and the disabled-tools set are replaced. Servers are
    /// diffed: entries absent from the new config are dropped, new entries
    /// are added, and replaced entries keep their current enabled flag.
    pub fn update(&mut self, new: ProxyConfig) {
        let ProxyConfig {
            mcp_servers: new_servers,
            disabled_tools,
            health_check_enabled,
            health_check_interval,
            health_check_timeout,
            health_check_failure_threshold,
            toon_compression_enabled,
            toon_compression_min_size,
            toon_describe_min_size,
            schema_compression_enabled,
            include_structured_content,
            pool_max_size,
        } = new;

        self.config.disabled_tools = disabled_tools;
        self.config.health_check_enabled = health_check_enabled;
        self.config.health_check_interval = health_check_interval;
        self.config.health_check_timeout = health_check_timeout;
        self.config.health_check_failure_threshold = health_check_failure_threshold;
        self.config.toon_compression_enabled = toon_compression_enabled;
        self.config.toon_compression_min_size = toon_compression_min_size;
        self.config.toon_describe_min_size = toon_describe_min_size;
        self.config.schema_compression_enabled = schema_compression_enabled;
        self.config.include_structured_content = include_structured_content;
        self.config.pool_max_size = pool_max_size;

        self.config
            .mcp_servers
            .retain(|name, _| new_servers.contains_key(name));
        for (name, mut server) in new_servers {
            if let Some(existing) = self.config.mcp_servers.get(&name) {
                server.enabled = existing.enabled;
            }
            self.config.mcp_servers.insert(name, server);
        }

        self.modified = true;
    }
}
