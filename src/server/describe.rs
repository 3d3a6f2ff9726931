//! Compact tool and resource descriptions.
//!
//! Rendered once at startup from the catalog and embedded in the outer tool
//! descriptions, so a connected client sees what the proxy can reach without
//! an extra round-trip.

use crate::manager::ServerManager;

const TOOL_DESC_MAX: usize = 60;
const RESOURCE_DESC_MAX: usize = 80;
const INSTRUCTIONS_MAX: usize = 300;

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// One line per tool: `server.tool(param, param?): description`.
///
/// Servers iterate in sorted order; parameters sort alphabetically with
/// optional ones marked `?`.
pub fn generate_tools_description(manager: &ServerManager) -> String {
    let mut lines = vec!["Available tools:".to_string()];

    for server_name in manager.list_servers() {
        for tool in manager.list_tools(&server_name) {
            let properties = tool
                .input_schema
                .get("properties")
                .and_then(serde_json::Value::as_object);
            let required: Vec<&str> = tool
                .input_schema
                .get("required")
                .and_then(serde_json::Value::as_array)
                .map(|r| r.iter().filter_map(serde_json::Value::as_str).collect())
                .unwrap_or_default();

            let mut params: Vec<String> = properties
                .map(|props| {
                    props
                        .keys()
                        .map(|name| {
                            if required.contains(&name.as_str()) {
                                name.clone()
                            } else {
                                format!("{name}?")
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            params.sort();

            let desc = truncate(&tool.description, TOOL_DESC_MAX);
            let full_name = tool.method();
            if params.is_empty() {
                lines.push(format!("  - {full_name}: {desc}"));
            } else {
                lines.push(format!("  - {full_name}({}): {desc}", params.join(", ")));
            }
        }
    }

    lines.join("\n")
}

/// Resources grouped by server, with MIME type, byte size, and a short
/// description when known.
pub fn generate_resources_description(manager: &ServerManager) -> String {
    let mut lines = vec!["Available resources:".to_string()];

    for server_name in manager.list_servers() {
        let resources = manager.list_resources(&server_name);
        if resources.is_empty() {
            continue;
        }

        let instructions = manager
            .server_identity(&server_name)
            .and_then(|identity| identity.instructions);
        match instructions {
            Some(text) if !text.is_empty() => {
                lines.push(format!(
                    "  Server: {server_name} - {}",
                    truncate(&text, INSTRUCTIONS_MAX)
                ));
            }
            _ => lines.push(format!("  Server: {server_name}")),
        }

        for resource in resources {
            let mime_info = resource
                .mime_type
                .as_ref()
                .map(|m| format!(" [{m}]"))
                .unwrap_or_default();
            let size_info = resource
                .size
                .map(|s| format!(" ({s} bytes)"))
                .unwrap_or_default();
            let desc = resource
                .description
                .as_ref()
                .map(|d| format!(": {}", truncate(d, RESOURCE_DESC_MAX)))
                .unwrap_or_default();
            lines.push(format!(
                "    - {} ({}){mime_info}{size_info}{desc}",
                resource.name, resource.uri
            ));
        }
    }

    if lines.len() > 1 {
        lines.join("\n")
    } else {
        "No resources available.".to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::config::ProxyConfig;
    use crate::manager::ServerManager;
    use crate::config::ConfigStore;

    #[test]
    fn empty_manager_renders_headers() {
        let manager = ServerManager::new(ConfigStore::in_memory(ProxyConfig::default()));
        assert_eq!(generate_tools_description(&manager), "Available tools:");
        assert_eq!(
            generate_resources_description(&manager),
            "No resources available."
        );
    }

    #[test]
    fn truncation_appends_ellipsis() {
        let long = "x".repeat(100);
        let short = truncate(&long, 60);
        assert_eq!(short.chars().count(), 60);
        assert!(short.ends_with("..."));
        assert_eq!(truncate("short", 60), "short");
    }
}
