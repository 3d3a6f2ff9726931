use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::ClientFactory;

/// Liveness classification for one upstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// Health record for one server.
///
/// A successful probe resets the failure counter; failures only flip the
/// status once the consecutive-failure threshold is reached, so a single
/// dropped probe does not mark a server unhealthy.
#[derive(Debug, Clone)]
pub struct ServerHealth {
    pub server_name: String,
    pub status: HealthState,
    pub last_check: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl ServerHealth {
    fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            status: HealthState::Unknown,
            last_check: None,
            last_success: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "server_name": self.server_name,
            "status": self.status.as_str(),
            "last_check": self.last_check.map(epoch_secs),
            "last_success": self.last_success.map(epoch_secs),
            "consecutive_failures": self.consecutive_failures,
            "last_error": self.last_error,
        })
    }
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// Aggregate health of all monitored servers.
#[derive(Debug, Default)]
pub struct HealthStatus {
    servers: HashMap<String, ServerHealth>,
}

impl HealthStatus {
    /// Record a probe result, applying the failure threshold.
    pub fn update_server(
        &mut self,
        name: &str,
        is_healthy: bool,
        error: Option<String>,
        failure_threshold: u32,
    ) {
        let now = SystemTime::now();
        let server = self
            .servers
            .entry(name.to_string())
            .or_insert_with(|| ServerHealth::new(name));

        server.last_check = Some(now);
        if is_healthy {
            server.status = HealthState::Healthy;
            server.last_success = Some(now);
            server.consecutive_failures = 0;
            server.last_error = None;
        } else {
            server.consecutive_failures += 1;
            server.last_error = Some(error.unwrap_or_else(|| "Unknown error".to_string()));
            if server.consecutive_failures >= failure_threshold {
                server.status = HealthState::Unhealthy;
            }
        }
    }

    pub fn insert_unknown(&mut self, name: &str) {
        self.servers
            .entry(name.to_string())
            .or_insert_with(|| ServerHealth::new(name));
    }

    pub fn remove(&mut self, name: &str) {
        self.servers.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&ServerHealth> {
        self.servers.get(name)
    }

    pub fn unhealthy_servers(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|(_, s)| s.status == HealthState::Unhealthy)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let count = |state: HealthState| {
            self.servers
                .values()
                .filter(|s| s.status == state)
                .count()
        };
        json!({
            "summary": {
                "total": self.servers.len(),
                "healthy": count(HealthState::Healthy),
                "unhealthy": count(HealthState::Unhealthy),
                "unknown": count(HealthState::Unknown),
            },
            "servers": self
                .servers
                .iter()
                .map(|(name, server)| (name.clone(), server.to_json()))
                .collect::<serde_json::Map<String, Value>>(),
        })
    }
}

/// Provider of the current probe targets (server name plus its factory).
///
/// The checker re-queries this every cycle so servers connected or
/// disconnected between cycles are picked up without restarting the loop.
pub type ProbeTargets = Arc<dyn Fn() -> Vec<(String, ClientFactory)> + Send + Sync>;

/// Background health monitor.
///
/// Every cycle, each known server is probed with a fresh client inside the
/// per-probe timeout; probes across servers run in parallel, and a server is
/// probed at most once per cycle. Probe failures are recorded, never
/// propagated.
pub struct HealthChecker {
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
    status: Arc<Mutex<HealthStatus>>,
    task: tokio::sync::Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl HealthChecker {
    pub fn new(interval: Duration, timeout: Duration, failure_threshold: u32) -> Self {
        Self {
            interval,
            timeout,
            failure_threshold,
            status: Arc::new(Mutex::new(HealthStatus::default())),
            task: tokio::sync::Mutex::new(None),
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, HealthStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background loop. Starting an already-running checker is a
    /// no-op.
    pub async fn start(&self, targets: ProbeTargets) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("health checker already running");
            return;
        }

        {
            let mut status = self.lock_status();
            for (name, _) in targets() {
                status.insert_unknown(&name);
            }
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let status = Arc::clone(&self.status);
        let interval = self.interval;
        let timeout = self.timeout;
        let threshold = self.failure_threshold;

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                timeout_secs = timeout.as_secs(),
                "health check loop started"
            );
            loop {
                let current = targets();
                if !current.is_empty() {
                    debug!(servers = current.len(), "running health check cycle");
                    let probes = current.into_iter().map(|(name, factory)| {
                        let status = Arc::clone(&status);
                        async move {
                            probe_server(&status, &name, &factory, timeout, threshold).await;
                        }
                    });
                    futures::future::join_all(probes).await;
                }

                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = loop_cancel.cancelled() => {
                        info!("health check loop cancelled");
                        break;
                    }
                }
            }
        });

        *task = Some((handle, cancel));
    }

    /// Stop the loop and wait for it to finish. Stopping an idle checker is
    /// a no-op.
    pub async fn stop(&self) {
        let taken = self.task.lock().await.take();
        if let Some((handle, cancel)) = taken {
            cancel.cancel();
            let _ = handle.await;
            info!("health checker stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Register a server so it shows up as `unknown` until first probed.
    pub fn add_server(&self, name: &str) {
        self.lock_status().insert_unknown(name);
    }

    pub fn remove_server(&self, name: &str) {
        self.lock_status().remove(name);
    }

    /// Probe one server immediately, outside the normal cycle.
    pub async fn check_server(&self, name: &str, factory: &ClientFactory) -> bool {
        probe_server(
            &self.status,
            name,
            factory,
            self.timeout,
            self.failure_threshold,
        )
        .await
    }

    pub fn server_health(&self, name: &str) -> Option<ServerHealth> {
        self.lock_status().get(name).cloned()
    }

    pub fn is_server_healthy(&self, name: &str) -> bool {
        self.lock_status()
            .get(name)
            .is_some_and(|s| s.status == HealthState::Healthy)
    }

    pub fn status_json(&self) -> Value {
        self.lock_status().to_json()
    }
}

/// Connect a fresh client, ping it, and record the outcome. The whole probe
/// runs inside the configured timeout; on breach it is cancelled and counted
/// as a failure.
async fn probe_server(
    status: &Arc<Mutex<HealthStatus>>,
    name: &str,
    factory: &ClientFactory,
    timeout: Duration,
    threshold: u32,
) -> bool {
    let probe = async {
        let mut client = factory.connect().await?;
        let outcome = client.ping().await;
        client.close().await;
        outcome
    };

    let result = match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("Timeout after {}s", timeout.as_secs())),
    };

    let mut guard = status.lock().unwrap_or_else(PoisonError::into_inner);
    match result {
        Ok(()) => {
            guard.update_server(name, true, None, threshold);
            debug!(server = name, "health check passed");
            true
        }
        Err(error) => {
            warn!(server = name, error = %error, "health check failed");
            guard.update_server(name, false, Some(error), threshold);
            false
        }
    }
}
