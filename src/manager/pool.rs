use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::client::{ClientFactory, UpstreamClient};

#[derive(Debug)]
struct PoolState {
    available: VecDeque<UpstreamClient>,
    in_use: usize,
    closed: bool,
}

#[derive(Debug)]
struct PoolShared {
    name: String,
    max_size: usize,
    factory: ClientFactory,
    state: Mutex<PoolState>,
    /// One permit per pool slot; closing the semaphore fails pending and
    /// future acquisitions.
    slots: Arc<Semaphore>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of reusable upstream clients for one server.
///
/// Reuse amortizes connection setup, which is substantial for stdio
/// upstreams (process spawn plus MCP handshake). Acquisition is bounded by a
/// semaphore, so at most `max_size` clients exist at once and waiters are
/// served in FIFO order. The returned guard gives the client back on every
/// exit path, including panics.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ConnectionPool")
            .field("name", &self.shared.name)
            .field("available", &state.available.len())
            .field("in_use", &state.in_use)
            .field("closed", &state.closed)
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(factory: ClientFactory, max_size: usize, name: &str) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.to_string(),
                max_size,
                factory,
                state: Mutex::new(PoolState {
                    available: VecDeque::new(),
                    in_use: 0,
                    closed: false,
                }),
                slots: Arc::new(Semaphore::new(max_size)),
            }),
        }
    }

    /// Acquire a client, reusing an idle one or connecting a fresh one under
    /// capacity. Blocks while the pool is saturated.
    pub async fn acquire(&self) -> anyhow::Result<PooledClient> {
        let permit = self
            .shared
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| {
                anyhow::anyhow!("connection pool '{}' is closed", self.shared.name)
            })?;

        let reused = {
            let mut state = self.shared.lock();
            if state.closed {
                anyhow::bail!("connection pool '{}' is closed", self.shared.name);
            }
            let client = state.available.pop_front();
            if client.is_some() {
                state.in_use += 1;
            }
            client
        };

        let client = match reused {
            Some(client) => {
                debug!(pool = %self.shared.name, "reusing pooled connection");
                client
            }
            None => {
                // Slot is held by the permit while we connect; a construction
                // failure releases it untouched.
                let client = self.shared.factory.connect().await?;
                let mut state = self.shared.lock();
                state.in_use += 1;
                debug!(pool = %self.shared.name, in_use = state.in_use, "created new connection");
                client
            }
        };

        Ok(PooledClient {
            client: Some(client),
            shared: Arc::clone(&self.shared),
            discard: false,
            _permit: permit,
        })
    }

    /// Close the pool: fail pending and future acquisitions and destroy all
    /// idle clients. In-use clients are destroyed when their guards release
    /// them into the now-closed pool.
    pub async fn close(&self) {
        let drained: Vec<UpstreamClient> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.available.drain(..).collect()
        };
        self.shared.slots.close();
        for mut client in drained {
            client.close().await;
        }
        debug!(pool = %self.shared.name, "pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn available_count(&self) -> usize {
        self.shared.lock().available.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.shared.lock().in_use
    }

    /// Idle plus in-use clients.
    pub fn size(&self) -> usize {
        let state = self.shared.lock();
        state.available.len() + state.in_use
    }

    pub fn factory(&self) -> &ClientFactory {
        &self.shared.factory
    }
}

/// Scoped handle to a pooled client.
///
/// Dropping the guard returns the client to the pool. If the pool has
/// closed, the pool is full, or the caller flagged the client as broken,
/// the client is destroyed instead.
#[derive(Debug)]
pub struct PooledClient {
    client: Option<UpstreamClient>,
    shared: Arc<PoolShared>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    /// Mark the client as broken so release destroys it instead of
    /// returning it. Callers do this after transport-level failures.
    pub const fn discard_on_release(&mut self) {
        self.discard = true;
    }
}

impl Deref for PooledClient {
    type Target = UpstreamClient;

    fn deref(&self) -> &UpstreamClient {
        match &self.client {
            Some(client) => client,
            // Only taken in Drop
            None => unreachable!("pooled client accessed after release"),
        }
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut UpstreamClient {
        match &mut self.client {
            Some(client) => client,
            None => unreachable!("pooled client accessed after release"),
        }
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };

        {
            let mut state = self.shared.lock();
            state.in_use = state.in_use.saturating_sub(1);
            if !self.discard
                && !state.closed
                && !client.is_closed()
                && state.available.len() < self.shared.max_size
            {
                state.available.push_back(client);
                debug!(pool = %self.shared.name, "connection returned to pool");
                return;
            }
        }

        // Destroy without blocking the release path. Outside a runtime the
        // client's own Drop tears the transport down.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pool_name = self.shared.name.clone();
            handle.spawn(async move {
                client.close().await;
                debug!(pool = %pool_name, "connection destroyed on release");
            });
        }
    }
}
