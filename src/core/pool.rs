//! Bounded connection pooling per tool server
//!
//! A semaphore caps simultaneously acquired connections at the endpoint's
//! `max_connections`. Idle connections are reused; broken ones are discarded
//! on release and replaced lazily on the next acquire. An optional reaper
//! closes connections idle past a TTL.

use crate::config::ServerEndpoint;
use crate::transport::{Connection, ConnectionFactory};
use crate::utils::errors::{ToolGateError, ToolGateResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection owned by the pool; never shared across concurrent acquirers
#[derive(Debug)]
pub struct PooledConnection {
    pub id: String,
    connection: Box<dyn Connection>,
    created_at: Instant,
    last_used_at: Instant,
}

impl PooledConnection {
    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}

/// Checked-out connection plus its capacity permit. Dropping the guard
/// without releasing discards the connection; the permit frees either way.
#[derive(Debug)]
pub struct PoolGuard {
    pub conn: PooledConnection,
    _permit: OwnedSemaphorePermit,
}

/// Occupancy snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub server: String,
    pub max_connections: usize,
    pub active: usize,
    pub idle: usize,
}

/// Connection pool for a single server
pub struct ConnectionPool {
    endpoint: ServerEndpoint,
    factory: Arc<dyn ConnectionFactory>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<PooledConnection>>,
    closed: std::sync::atomic::AtomicBool,
}

impl ConnectionPool {
    pub fn new(endpoint: ServerEndpoint, factory: Arc<dyn ConnectionFactory>) -> Self {
        let max = endpoint.max_connections.max(1);
        Self {
            endpoint,
            factory,
            semaphore: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(Vec::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Acquire a connection, reusing an idle one or creating a new one under
    /// the capacity bound. The whole operation, permit wait included, is
    /// bounded by `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> ToolGateResult<PoolGuard> {
        if self.is_closed() {
            return Err(ToolGateError::Connection(format!(
                "pool for '{}' is shut down",
                self.endpoint.name
            )));
        }

        let deadline = tokio::time::Instant::now() + timeout;

        let permit = tokio::time::timeout_at(deadline, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| ToolGateError::PoolExhausted(self.endpoint.name.clone()))?
            .map_err(|_| {
                ToolGateError::Connection(format!("pool for '{}' is shut down", self.endpoint.name))
            })?;

        // Prefer an idle connection that is still usable.
        loop {
            let candidate = self.idle.lock().pop();
            match candidate {
                Some(conn) => {
                    if conn.connection.is_alive().await {
                        debug!(
                            "reusing connection {} for {}",
                            conn.id, self.endpoint.name
                        );
                        return Ok(PoolGuard {
                            conn,
                            _permit: permit,
                        });
                    }
                    debug!(
                        "discarding dead idle connection {} for {}",
                        conn.id, self.endpoint.name
                    );
                    let _ = conn.connection.close().await;
                }
                None => break,
            }
        }

        // Replacement is lazy: create only when a caller actually needs one.
        let connection = tokio::time::timeout_at(deadline, self.factory.connect(&self.endpoint))
            .await
            .map_err(|_| ToolGateError::PoolExhausted(self.endpoint.name.clone()))??;

        let now = Instant::now();
        let conn = PooledConnection {
            id: format!("{}-{}", self.endpoint.name, uuid::Uuid::new_v4()),
            connection,
            created_at: now,
            last_used_at: now,
        };
        info!("created connection {} for {}", conn.id, self.endpoint.name);

        Ok(PoolGuard {
            conn,
            _permit: permit,
        })
    }

    /// Return a connection to the idle set, or discard it when the caller
    /// saw it break.
    pub async fn release(&self, guard: PoolGuard, healthy: bool) {
        let PoolGuard { mut conn, _permit } = guard;

        if !healthy || self.is_closed() {
            debug!(
                "discarding connection {} for {} (healthy={})",
                conn.id, self.endpoint.name, healthy
            );
            let _ = conn.connection.close().await;
            return;
        }

        conn.last_used_at = Instant::now();
        self.idle.lock().push(conn);
    }

    /// Close idle connections older than `max_idle`. Called by the reaper.
    pub async fn reap_idle(&self, max_idle: Duration) {
        let stale: Vec<PooledConnection> = {
            let mut idle = self.idle.lock();
            let (stale, fresh): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|conn| conn.idle_duration() > max_idle);
            *idle = fresh;
            stale
        };

        for conn in stale {
            debug!(
                "reaping idle connection {} for {}",
                conn.id, self.endpoint.name
            );
            let _ = conn.connection.close().await;
        }
    }

    /// Drain and dispose every connection; subsequent acquires fail.
    pub async fn close_all(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.semaphore.close();

        let drained: Vec<PooledConnection> = self.idle.lock().drain(..).collect();
        for conn in drained {
            if let Err(e) = conn.connection.close().await {
                warn!("error closing connection {}: {}", conn.id, e);
            }
        }
        info!("pool for '{}' shut down", self.endpoint.name);
    }

    pub fn stats(&self) -> PoolStats {
        let max = self.endpoint.max_connections.max(1);
        let available = self.semaphore.available_permits();
        PoolStats {
            server: self.endpoint.name.clone(),
            max_connections: max,
            active: max.saturating_sub(available),
            idle: self.idle.lock().len(),
        }
    }
}

/// Pools for all registered servers
pub struct ConnectionPoolManager {
    pools: DashMap<String, Arc<ConnectionPool>>,
    factory: Arc<dyn ConnectionFactory>,
    reaper: Mutex<Option<CancellationToken>>,
}

impl ConnectionPoolManager {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            pools: DashMap::new(),
            factory,
            reaper: Mutex::new(None),
        }
    }

    pub fn get_or_create(&self, endpoint: &ServerEndpoint) -> Arc<ConnectionPool> {
        self.pools
            .entry(endpoint.name.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    endpoint.clone(),
                    Arc::clone(&self.factory),
                ))
            })
            .clone()
    }

    /// Shut down and drop the pool for one server.
    pub async fn remove(&self, server_name: &str) {
        if let Some((_, pool)) = self.pools.remove(server_name) {
            pool.close_all().await;
        }
    }

    /// Replace the pool on re-registration; the old pool is shut down.
    pub async fn replace(&self, endpoint: &ServerEndpoint) -> Arc<ConnectionPool> {
        self.remove(&endpoint.name).await;
        self.get_or_create(endpoint)
    }

    pub fn all_stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(|entry| entry.value().stats()).collect()
    }

    /// Start the background idle reaper. Stopped by `shutdown` or a repeated
    /// call.
    pub fn start_reaper(self: &Arc<Self>, interval: Duration, max_idle: Duration) {
        let token = CancellationToken::new();
        if let Some(previous) = self.reaper.lock().replace(token.clone()) {
            previous.cancel();
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for entry in manager.pools.iter() {
                            entry.value().reap_idle(max_idle).await;
                        }
                    }
                }
            }
            debug!("pool reaper stopped");
        });
    }

    pub async fn shutdown(&self) {
        if let Some(token) = self.reaper.lock().take() {
            token.cancel();
        }
        info!("shutting down connection pools");
        for entry in self.pools.iter() {
            entry.value().close_all().await;
        }
        self.pools.clear();
    }
}
