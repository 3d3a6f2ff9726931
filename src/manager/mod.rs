//! Upstream lifecycle and request routing.
//!
//! The [`ServerManager`] owns every connected backend: its client factory,
//! its connection pool, its cached catalog, and its health record. Outer
//! tool adapters hold a shared reference and route `invoke`/`read` through
//! [`ServerManager::call`] and [`ServerManager::read`].

pub mod catalog;
pub mod client;
pub mod health;
pub mod pool;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rmcp::model::ReadResourceResult;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::config::ConfigStore;
use crate::error::MuxError;
use crate::payload::{Payload, ToonCompressor, extract_call_result};

use catalog::{CatalogEntry, ResourceDescriptor, ServerIdentity, ToolDescriptor};
use client::{ClientFactory, TransportSpec, is_transport_error};
use health::{HealthChecker, ProbeTargets, ServerHealth};
use pool::ConnectionPool;

/// Longest resource-body preview used to backfill a missing description.
const DESCRIPTION_PREVIEW_CHARS: usize = 100;

/// Runtime state for one connected backend.
///
/// A handle exists only while the backend is enabled and its initial catalog
/// fetch succeeded; it owns the pool, which owns the clients.
struct BackendHandle {
    pool: ConnectionPool,
    catalog: CatalogEntry,
}

/// Result of a routed tool call.
#[derive(Debug)]
pub struct CallOutcome {
    /// Extracted payload, multimodal items untouched.
    pub payload: Payload,
    /// TOON rendering of the payload, when compression applied.
    pub compressed: Option<String>,
}

impl CallOutcome {
    pub const fn was_compressed(&self) -> bool {
        self.compressed.is_some()
    }
}

/// Manages all upstream MCP server connections.
///
/// Connect/disconnect/reload mutate the handle map under a single admin
/// lock; the call and read paths only take cheap snapshot reads.
pub struct ServerManager {
    store: RwLock<ConfigStore>,
    handles: Arc<RwLock<HashMap<String, Arc<BackendHandle>>>>,
    compressor: ToonCompressor,
    health: HealthChecker,
    /// Serializes connect/disconnect/reload/close.
    admin: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ServerManager {
    pub fn new(store: ConfigStore) -> Self {
        let config = store.config();
        let compressor =
            ToonCompressor::new(config.toon_compression_enabled, config.toon_compression_min_size);
        let health = HealthChecker::new(
            Duration::from_secs(config.health_check_interval),
            Duration::from_secs(config.health_check_timeout),
            config.health_check_failure_threshold,
        );
        Self {
            store: RwLock::new(store),
            handles: Arc::new(RwLock::new(HashMap::new())),
            compressor,
            health,
            admin: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Connect every enabled server from the config and start the health
    /// loop. A server that fails to connect is logged and skipped; it never
    /// aborts the others.
    pub async fn initialize(self: &Arc<Self>) {
        let _admin = self.admin.lock().await;
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let servers: Vec<(String, bool)> = {
            let store = read_lock(&self.store);
            store
                .config()
                .mcp_servers
                .iter()
                .map(|(name, server)| (name.clone(), server.enabled))
                .collect()
        };

        for (name, enabled) in servers {
            if !enabled {
                info!(server = %name, "server is disabled, skipping");
                continue;
            }
            if let Err(e) = self.connect_backend_inner(&name).await {
                error!(server = %name, error = %e, "failed to connect to server");
            }
        }

        let health_enabled = read_lock(&self.store).config().health_check_enabled;
        let connected = read_lock(&self.handles).len();
        if health_enabled && connected > 0 {
            self.health.start(self.probe_targets()).await;
            info!(servers = connected, "health checker started");
        }
    }

    /// Incrementally connect one configured server.
    pub async fn connect_server(self: &Arc<Self>, name: &str) -> bool {
        let _admin = self.admin.lock().await;
        if read_lock(&self.handles).contains_key(name) {
            warn!(server = %name, "server already connected");
            return true;
        }
        match self.connect_backend_inner(name).await {
            Ok(()) => true,
            Err(e) => {
                error!(server = %name, error = %e, "failed to connect to server");
                false
            }
        }
    }

    async fn connect_backend_inner(&self, name: &str) -> anyhow::Result<()> {
        let (spec, enabled) = {
            let store = read_lock(&self.store);
            let server = store
                .get_server(name)
                .ok_or_else(|| anyhow::anyhow!("server '{name}' not found in config"))?;
            (TransportSpec::from_config(name, server)?, server.enabled)
        };
        if !enabled {
            anyhow::bail!("server '{name}' is disabled");
        }
        let factory = ClientFactory::from_spec(name, spec);
        self.connect_with_factory(name, factory).await
    }

    /// Connect a backend through an explicit client factory.
    ///
    /// This is the shared tail of the connect paths; tests use it to wire
    /// in-process backends that no config file could describe.
    pub async fn connect_with_factory(
        &self,
        name: &str,
        factory: ClientFactory,
    ) -> anyhow::Result<()> {
        if read_lock(&self.handles).contains_key(name) {
            warn!(server = %name, "server already connected");
            return Ok(());
        }
        let pool_max = read_lock(&self.store).config().pool_max_size;
        let pool = ConnectionPool::new(factory, pool_max, name);

        // Warm one connection and take the catalog snapshot from it. Any
        // failure here leaves no trace of the backend.
        let catalog = match self.fetch_catalog(name, &pool).await {
            Ok(catalog) => catalog,
            Err(e) => {
                pool.close().await;
                return Err(e);
            }
        };

        info!(
            server = %name,
            tools = catalog.tools.len(),
            resources = catalog.resources.len(),
            "connected to server"
        );

        let handle = Arc::new(BackendHandle { pool, catalog });
        write_lock(&self.handles).insert(name.to_string(), handle);
        self.health.add_server(name);
        Ok(())
    }

    async fn fetch_catalog(&self, name: &str, pool: &ConnectionPool) -> anyhow::Result<CatalogEntry> {
        let client = pool.acquire().await?;

        let identity = client.server_info().map_or_else(
            || ServerIdentity::unknown(name),
            |info| ServerIdentity {
                name: name.to_string(),
                server_name: if info.server_info.name.is_empty() {
                    name.to_string()
                } else {
                    info.server_info.name.clone()
                },
                version: info.server_info.version.clone(),
                instructions: info.instructions.clone(),
            },
        );

        let tools: Vec<ToolDescriptor> = client
            .list_tools()
            .await?
            .iter()
            .map(|tool| ToolDescriptor::from_tool(name, tool))
            .collect();
        info!(server = %name, count = tools.len(), "cached tools");

        let mut resources: Vec<ResourceDescriptor> = match client.list_resources().await {
            Ok(list) => list
                .iter()
                .map(|resource| ResourceDescriptor::from_resource(name, resource))
                .collect(),
            Err(e) => {
                warn!(server = %name, error = %e, "failed to list resources");
                Vec::new()
            }
        };

        // Best-effort description backfill for textual resources: preview the
        // first characters of the body. Failures are silent.
        for resource in &mut resources {
            if resource.description.is_none() && resource.has_textual_mime() {
                resource.description = preview_resource(&client, &resource.uri).await;
            }
        }

        Ok(CatalogEntry {
            identity,
            tools,
            resources,
        })
    }

    /// Incrementally disconnect one server, wiping its catalog and health
    /// record. Returns false if it was not connected.
    pub async fn disconnect_server(&self, name: &str) -> bool {
        let _admin = self.admin.lock().await;
        self.disconnect_inner(name).await
    }

    async fn disconnect_inner(&self, name: &str) -> bool {
        let Some(handle) = write_lock(&self.handles).remove(name) else {
            warn!(server = %name, "server not connected");
            return false;
        };
        self.health.remove_server(name);
        handle.pool.close().await;
        info!(server = %name, "disconnected from server");
        true
    }

    /// Close everything and reconnect from the current config.
    ///
    /// Reload is administrative: in-flight requests may observe a transient
    /// server-not-found while the map is empty.
    pub async fn reload(self: &Arc<Self>) {
        self.close().await;
        self.initialize().await;
        info!("server manager reloaded");
    }

    /// Stop the health loop, close every pool, and clear all caches.
    pub async fn close(&self) {
        let _admin = self.admin.lock().await;
        self.health.stop().await;

        let drained: Vec<(String, Arc<BackendHandle>)> =
            write_lock(&self.handles).drain().collect();
        for (name, handle) in drained {
            handle.pool.close().await;
            self.health.remove_server(&name);
        }
        self.initialized.store(false, Ordering::SeqCst);
    }

    fn probe_targets(self: &Arc<Self>) -> ProbeTargets {
        let handles = Arc::downgrade(&self.handles);
        Arc::new(move || {
            handles.upgrade().map_or_else(Vec::new, |handles| {
                read_lock(&handles)
                    .iter()
                    .map(|(name, handle)| (name.clone(), handle.pool.factory().clone()))
                    .collect()
            })
        })
    }

    fn handle(&self, server_name: &str) -> Option<Arc<BackendHandle>> {
        read_lock(&self.handles).get(server_name).cloned()
    }

    /// Execute a tool call against a connected backend.
    ///
    /// Routing order: server lookup, catalog lookup, disabled check, shallow
    /// argument validation, pooled upstream call, payload extraction and
    /// compression.
    pub async fn call(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallOutcome, MuxError> {
        let Some(handle) = self.handle(server_name) else {
            return Err(MuxError::ServerNotFound {
                server: server_name.to_string(),
                available: self.list_servers(),
            });
        };

        let Some(tool) = handle.catalog.get_tool(tool_name) else {
            return Err(MuxError::ToolNotFound {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
                available: handle.catalog.tool_names(),
            });
        };

        if self.is_tool_disabled(&format!("{server_name}.{tool_name}")) {
            return Err(MuxError::ToolDisabled {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
            });
        }

        let args = arguments.unwrap_or_default();
        validate_arguments(&args, &tool.input_schema)?;

        let execution_error = |message: String| MuxError::Execution {
            server: server_name.to_string(),
            tool: tool_name.to_string(),
            message,
        };

        let mut client = handle
            .pool
            .acquire()
            .await
            .map_err(|e| execution_error(e.to_string()))?;

        // Null and empty arguments both reach the upstream as {}
        let result = match client.call_tool(tool_name, Some(args)).await {
            Ok(result) => result,
            Err(e) => {
                if is_transport_error(&e) || client.is_closed() {
                    client.discard_on_release();
                }
                error!(server = %server_name, tool = %tool_name, error = %e, "tool call failed");
                return Err(execution_error(e.to_string()));
            }
        };

        if result.is_error == Some(true) {
            let message = result
                .content
                .iter()
                .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(execution_error(if message.is_empty() {
                "tool reported an error".to_string()
            } else {
                message
            }));
        }

        let payload = extract_call_result(&result);
        let compressed = match &payload {
            Payload::Value(value) => self.compressor.compress(value),
            Payload::Multimodal(_) => None,
        };

        Ok(CallOutcome {
            payload,
            compressed,
        })
    }

    /// Read a resource from a connected backend.
    pub async fn read(
        &self,
        server_name: &str,
        uri: &str,
    ) -> Result<ReadResourceResult, MuxError> {
        let Some(handle) = self.handle(server_name) else {
            return Err(MuxError::ServerNotFound {
                server: server_name.to_string(),
                available: self.list_servers(),
            });
        };

        let not_found = || MuxError::ResourceNotFound {
            server: server_name.to_string(),
            uri: uri.to_string(),
        };

        let mut client = handle.pool.acquire().await.map_err(|e| {
            error!(server = %server_name, uri = %uri, error = %e, "resource read failed");
            not_found()
        })?;

        match client.read_resource(uri).await {
            Ok(result) if result.contents.is_empty() => Err(not_found()),
            Ok(result) => Ok(result),
            Err(e) => {
                if client.is_closed() {
                    client.discard_on_release();
                }
                error!(server = %server_name, uri = %uri, error = %e, "resource read failed");
                Err(not_found())
            }
        }
    }

    // ---- Catalog reads (lock-free snapshots of installed entries) ----

    /// Connected server names, sorted for stable presentation.
    pub fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.handles).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_server(&self, server_name: &str) -> bool {
        read_lock(&self.handles).contains_key(server_name)
    }

    /// Tools of one server in the order fetched.
    pub fn list_tools(&self, server_name: &str) -> Vec<ToolDescriptor> {
        self.handle(server_name)
            .map(|h| h.catalog.tools.clone())
            .unwrap_or_default()
    }

    /// All tools across servers, iterated in server-name order.
    pub fn list_all_tools(&self) -> Vec<ToolDescriptor> {
        let handles = read_lock(&self.handles);
        let mut names: Vec<&String> = handles.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| handles.get(name))
            .flat_map(|h| h.catalog.tools.clone())
            .collect()
    }

    pub fn get_tool(&self, server_name: &str, tool_name: &str) -> Option<ToolDescriptor> {
        self.handle(server_name)
            .and_then(|h| h.catalog.get_tool(tool_name).cloned())
    }

    pub fn list_resources(&self, server_name: &str) -> Vec<ResourceDescriptor> {
        self.handle(server_name)
            .map(|h| h.catalog.resources.clone())
            .unwrap_or_default()
    }

    pub fn list_all_resources(&self) -> Vec<ResourceDescriptor> {
        let handles = read_lock(&self.handles);
        let mut names: Vec<&String> = handles.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| handles.get(name))
            .flat_map(|h| h.catalog.resources.clone())
            .collect()
    }

    pub fn get_resource(&self, server_name: &str, uri: &str) -> Option<ResourceDescriptor> {
        self.handle(server_name)
            .and_then(|h| h.catalog.get_resource(uri).cloned())
    }

    pub fn server_identity(&self, server_name: &str) -> Option<ServerIdentity> {
        self.handle(server_name).map(|h| h.catalog.identity.clone())
    }

    // ---- Config store passthroughs ----

    pub fn is_tool_disabled(&self, tool_key: &str) -> bool {
        read_lock(&self.store).is_tool_disabled(tool_key)
    }

    pub fn set_tool_enabled(&self, server_name: &str, tool_name: &str, enabled: bool) {
        let key = format!("{server_name}.{tool_name}");
        let mut store = write_lock(&self.store);
        if enabled {
            store.enable_tool(&key);
        } else {
            store.disable_tool(&key);
        }
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&ConfigStore) -> R) -> R {
        f(&read_lock(&self.store))
    }

    pub fn with_store_mut<R>(&self, f: impl FnOnce(&mut ConfigStore) -> R) -> R {
        f(&mut write_lock(&self.store))
    }

    /// Compressor view for the describe path, which uses its own threshold.
    pub fn compress_describe(&self, value: &Value) -> Option<String> {
        let min = read_lock(&self.store).config().toon_describe_min_size;
        self.compressor.compress_with_min(value, min)
    }

    // ---- Health passthroughs ----

    pub fn health_status(&self) -> Value {
        self.health.status_json()
    }

    pub fn server_health(&self, server_name: &str) -> Option<ServerHealth> {
        self.health.server_health(server_name)
    }

    pub fn is_server_healthy(&self, server_name: &str) -> bool {
        self.health.is_server_healthy(server_name)
    }

    /// Trigger one immediate probe of a connected server.
    pub async fn check_server_health(&self, server_name: &str) -> bool {
        match self.handle(server_name) {
            Some(handle) => {
                self.health
                    .check_server(server_name, handle.pool.factory())
                    .await
            }
            None => false,
        }
    }
}

/// Shallow argument validation against a tool's input schema.
///
/// Only two checks run here: every `required` field is present, and every
/// provided key appears under `properties`. Deeper type and format
/// validation stays with the upstream, which is authoritative.
fn validate_arguments(args: &Map<String, Value>, schema: &Value) -> Result<(), MuxError> {
    let validation_error = |message: String| MuxError::Validation {
        message,
        schema: Some(schema.clone()),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(validation_error(format!(
                    "Missing required argument: '{field}'"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for key in args.keys() {
            if !properties.contains_key(key) {
                let available = properties
                    .keys()
                    .map(|k| format!("'{k}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(validation_error(format!(
                    "Unknown argument: '{key}'. Available: [{available}]"
                )));
            }
        }
    }

    Ok(())
}

/// First characters of a textual resource, for catalog descriptions.
async fn preview_resource(
    client: &client::UpstreamClient,
    uri: &str,
) -> Option<String> {
    let result = client.read_resource(uri).await.ok()?;
    let text = result.contents.iter().find_map(|content| match content {
        rmcp::model::ResourceContents::TextResourceContents { text, .. } => Some(text),
        rmcp::model::ResourceContents::BlobResourceContents { .. } => None,
    })?;
    Some(text.chars().take(DESCRIPTION_PREVIEW_CHARS).collect())
}
