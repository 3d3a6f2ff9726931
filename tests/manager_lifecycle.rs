//! Lifecycle, catalog, pool, and health behavior of the server manager
//! against the in-process mock backend.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use common::{NOTES_URI, connected_manager, mock_factory, mock_factory_counted};
use mcpmux::config::{ConfigStore, McpServerConfig, ProxyConfig, TransportKind};
use mcpmux::error::MuxError;
use mcpmux::manager::ServerManager;
use mcpmux::payload::Payload;

fn args(value: serde_json::Value) -> Option<serde_json::Map<String, serde_json::Value>> {
    Some(value.as_object().unwrap().clone())
}

// ---- Catalog ----

#[tokio::test]
async fn connect_populates_catalog() {
    let manager = connected_manager().await;

    assert_eq!(manager.list_servers(), vec!["mock"]);
    assert!(manager.has_server("mock"));

    let tools = manager.list_tools("mock");
    assert_eq!(tools.len(), 8);
    assert!(manager.get_tool("mock", "echo").is_some());
    assert!(manager.get_tool("mock", "nope").is_none());

    // Schema cached verbatim
    let read_file = manager.get_tool("mock", "read_file").unwrap();
    assert_eq!(read_file.input_schema["required"], json!(["path"]));

    let identity = manager.server_identity("mock").unwrap();
    assert_eq!(identity.name, "mock");
    assert_eq!(identity.server_name, "mock-backend");
    assert_eq!(identity.version, "0.1.0");
    assert_eq!(
        identity.instructions.as_deref(),
        Some("Mock upstream for proxy tests.")
    );
}

#[tokio::test]
async fn catalog_is_stable_across_describes() {
    let manager = connected_manager().await;
    let first: Vec<String> = manager
        .list_tools("mock")
        .iter()
        .map(|t| t.name.clone())
        .collect();
    let second: Vec<String> = manager
        .list_tools("mock")
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn textual_resource_description_backfills_from_body() {
    let manager = connected_manager().await;

    let notes = manager.get_resource("mock", NOTES_URI).unwrap();
    let description = notes.description.unwrap();
    assert_eq!(description.chars().count(), 100);
    assert!(description.starts_with("The quick brown fox"));

    // Existing descriptions are left alone
    let logo = manager.get_resource("mock", "file:///logo.png").unwrap();
    assert_eq!(logo.description.as_deref(), Some("Project logo"));
}

#[tokio::test]
async fn connect_twice_is_a_noop() {
    let manager = connected_manager().await;
    manager
        .connect_with_factory("mock", mock_factory())
        .await
        .unwrap();
    assert_eq!(manager.list_servers(), vec!["mock"]);
}

// ---- Disconnect / close ----

#[tokio::test]
async fn disconnect_returns_catalog_to_preconnect_state() {
    let manager = connected_manager().await;
    assert!(manager.server_health("mock").is_some());

    assert!(manager.disconnect_server("mock").await);

    assert!(manager.list_servers().is_empty());
    assert!(manager.list_tools("mock").is_empty());
    assert!(manager.list_all_resources().is_empty());
    assert!(manager.get_tool("mock", "echo").is_none());
    assert!(manager.server_identity("mock").is_none());
    assert!(manager.server_health("mock").is_none());

    // Second disconnect reports not-connected
    assert!(!manager.disconnect_server("mock").await);
}

#[tokio::test]
async fn call_after_disconnect_is_server_not_found() {
    let manager = connected_manager().await;
    manager.disconnect_server("mock").await;

    let err = manager.call("mock", "echo", None).await.unwrap_err();
    assert!(matches!(err, MuxError::ServerNotFound { .. }));
}

#[tokio::test]
async fn close_empties_handle_map() {
    let manager = connected_manager().await;
    manager.close().await;
    assert!(manager.list_servers().is_empty());
    assert!(manager.list_all_tools().is_empty());

    let err = manager.call("mock", "echo", None).await.unwrap_err();
    assert!(matches!(err, MuxError::ServerNotFound { .. }));
}

#[tokio::test]
async fn reconnect_after_disconnect_works() {
    let manager = connected_manager().await;
    manager.disconnect_server("mock").await;
    manager
        .connect_with_factory("mock", mock_factory())
        .await
        .unwrap();

    let outcome = manager
        .call("mock", "echo", args(json!({"text": "back"})))
        .await
        .unwrap();
    match outcome.payload {
        Payload::Value(value) => assert_eq!(value, json!("back")),
        Payload::Multimodal(_) => panic!("expected value"),
    }
}

// ---- Call outcomes at the manager level ----

#[tokio::test]
async fn call_returns_raw_and_compressed_forms() {
    let manager = connected_manager().await;
    let outcome = manager.call("mock", "get_records", None).await.unwrap();
    assert!(outcome.was_compressed());
    assert_eq!(outcome.payload.to_value().as_array().unwrap().len(), 5);
    assert!(
        outcome
            .compressed
            .unwrap()
            .starts_with("[5]{id,name}:")
    );
}

#[tokio::test]
async fn call_double_encoded_payload_extracts_value() {
    let manager = connected_manager().await;
    let outcome = manager
        .call("mock", "get_double_encoded", None)
        .await
        .unwrap();
    assert_eq!(outcome.payload.to_value(), json!([{"k": 1}]));
}

#[tokio::test]
async fn call_multimodal_skips_compression() {
    let manager = connected_manager().await;
    let outcome = manager.call("mock", "get_image", None).await.unwrap();
    assert!(outcome.payload.is_multimodal());
    assert!(!outcome.was_compressed());
}

#[tokio::test]
async fn successful_validated_call_never_errors() {
    let manager = connected_manager().await;
    for _ in 0..5 {
        let outcome = manager
            .call("mock", "echo", args(json!({"text": "ok"})))
            .await;
        assert!(outcome.is_ok());
    }
}

// ---- Pool behavior ----

#[tokio::test]
async fn sequential_calls_reuse_one_connection() {
    let counter = Arc::new(AtomicUsize::new(0));
    let manager = Arc::new(ServerManager::new(ConfigStore::in_memory(
        ProxyConfig::default(),
    )));
    manager
        .connect_with_factory("mock", mock_factory_counted(Arc::clone(&counter)))
        .await
        .unwrap();

    for _ in 0..4 {
        manager
            .call("mock", "echo", args(json!({"text": "x"})))
            .await
            .unwrap();
    }

    // One connection from the catalog warm-up, reused by every call
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn capacity_one_serializes_concurrent_calls() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = ProxyConfig {
        pool_max_size: 1,
        ..ProxyConfig::default()
    };
    let manager = Arc::new(ServerManager::new(ConfigStore::in_memory(config)));
    manager
        .connect_with_factory("mock", mock_factory_counted(Arc::clone(&counter)))
        .await
        .unwrap();

    let calls = (0..6).map(|i| {
        let manager = Arc::clone(&manager);
        async move {
            manager
                .call("mock", "echo", args(json!({"text": format!("c{i}")})))
                .await
        }
    });
    let results = futures::future::join_all(calls).await;
    for result in results {
        assert!(result.is_ok());
    }

    // A second client is never constructed past the capacity of one
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn parallel_calls_stay_within_capacity() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = ProxyConfig {
        pool_max_size: 3,
        ..ProxyConfig::default()
    };
    let manager = Arc::new(ServerManager::new(ConfigStore::in_memory(config)));
    manager
        .connect_with_factory("mock", mock_factory_counted(Arc::clone(&counter)))
        .await
        .unwrap();

    let calls = (0..12).map(|_| {
        let manager = Arc::clone(&manager);
        async move { manager.call("mock", "get_data", None).await }
    });
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(Result::is_ok));
    assert!(
        counter.load(Ordering::SeqCst) <= 3,
        "constructed {} clients with capacity 3",
        counter.load(Ordering::SeqCst)
    );
}

// ---- Config-driven connect paths ----

fn stdio_config(command: &str, enabled: bool) -> McpServerConfig {
    McpServerConfig {
        kind: TransportKind::Stdio,
        command: Some(command.to_string()),
        args: vec![],
        env: None,
        url: None,
        headers: None,
        enabled,
    }
}

#[tokio::test]
async fn connect_server_with_dead_command_fails_cleanly() {
    let mut config = ProxyConfig::default();
    config.mcp_servers.insert(
        "bad".to_string(),
        stdio_config("/nonexistent/binary/that/does/not/exist", true),
    );
    let manager = Arc::new(ServerManager::new(ConfigStore::in_memory(config)));

    assert!(!manager.connect_server("bad").await);
    assert!(manager.list_servers().is_empty());
    assert!(!manager.connect_server("unconfigured").await);
}

#[tokio::test]
async fn disabled_server_is_not_connected() {
    let mut config = ProxyConfig::default();
    config.mcp_servers.insert(
        "off".to_string(),
        stdio_config("/nonexistent/binary/that/does/not/exist", false),
    );
    let manager = Arc::new(ServerManager::new(ConfigStore::in_memory(config)));

    assert!(!manager.connect_server("off").await);

    // initialize skips it too, and a failed init leaves a clean map
    manager.initialize().await;
    assert!(manager.list_servers().is_empty());
    manager.close().await;
}

#[tokio::test]
async fn bulk_config_update_diffs_servers() {
    let manager = connected_manager().await;
    manager.with_store_mut(|store| {
        let mut new_config = ProxyConfig::default();
        new_config
            .mcp_servers
            .insert("fs".to_string(), stdio_config("npx", true));
        store.update(new_config);
    });
    assert!(manager.with_store(|s| s.get_server("fs").is_some()));
    assert!(manager.with_store(|s| s.is_modified()));
}

// ---- Health ----

#[tokio::test]
async fn manual_health_check_reports_healthy() {
    let manager = connected_manager().await;
    assert!(manager.check_server_health("mock").await);
    assert!(manager.is_server_healthy("mock"));

    let health = manager.server_health("mock").unwrap();
    assert_eq!(health.consecutive_failures, 0);
    assert!(health.last_success.is_some());
}

#[tokio::test]
async fn health_snapshot_counts_connected_servers() {
    let manager = connected_manager().await;
    manager.check_server_health("mock").await;

    let snapshot = manager.health_status();
    assert_eq!(snapshot["summary"]["total"], 1);
    assert_eq!(snapshot["summary"]["healthy"], 1);
    assert_eq!(snapshot["servers"]["mock"]["status"], "healthy");
}

#[tokio::test]
async fn health_check_for_unknown_server_fails() {
    let manager = connected_manager().await;
    assert!(!manager.check_server_health("ghost").await);
}

// ---- Disabled tools at the manager level ----

#[tokio::test]
async fn disabled_tool_round_trip_restores_set() {
    let manager = connected_manager().await;
    let before = manager.with_store(|s| s.disabled_tools());

    manager.set_tool_enabled("mock", "echo", false);
    let err = manager
        .call("mock", "echo", args(json!({"text": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, MuxError::ToolDisabled { .. }));

    manager.set_tool_enabled("mock", "echo", true);
    let after = manager.with_store(|s| s.disabled_tools());
    assert_eq!(before, after);
}
