//! Client facade
//!
//! Orchestrates cache, circuit breaker, rate limiter, pool and transport for
//! `invoke_tool`, resolves service-type targets through the health monitor,
//! and performs at most one transparent failover to an alternate server of
//! the same service type.

use crate::cache::{CacheBackend, InMemoryBackend, ResultCache};
use crate::config::{Config, GlobalConfig, MetricsFormat, ServerEndpoint};
use crate::core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerManager, ExecutionGate};
use crate::core::health::{HealthMonitor, HealthRecord, HealthSummary};
use crate::core::pool::{ConnectionPoolManager, PoolStats};
use crate::core::protocol::{JsonRpcRequest, ToolResult};
use crate::core::rate_limiter::{RateLimiterConfig, RateLimiterManager};
use crate::core::registry::ServerRegistry;
use crate::transport::{ConnectionFactory, DefaultConnectionFactory};
use crate::utils::clock::{SharedClock, SystemClock};
use crate::utils::errors::{ToolGateError, ToolGateResult};
use crate::utils::metrics::MetricsCollector;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct ToolClient {
    global: GlobalConfig,
    registry: Arc<ServerRegistry>,
    breakers: CircuitBreakerManager,
    limiters: RateLimiterManager,
    pools: Arc<ConnectionPoolManager>,
    cache: ResultCache,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsCollector>,
}

impl ToolClient {
    /// Client with production defaults: real transports, in-memory cache,
    /// system clock.
    pub fn new(global: GlobalConfig) -> Self {
        Self::with_parts(
            global,
            Arc::new(DefaultConnectionFactory),
            Arc::new(InMemoryBackend::new()),
            Arc::new(SystemClock),
        )
    }

    /// Client with injected transport factory, cache backend and clock.
    pub fn with_parts(
        global: GlobalConfig,
        factory: Arc<dyn ConnectionFactory>,
        cache_backend: Arc<dyn CacheBackend>,
        clock: SharedClock,
    ) -> Self {
        let registry = Arc::new(ServerRegistry::new());
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&factory),
            &global,
            Arc::clone(&clock),
        ));

        Self {
            global,
            registry,
            breakers: CircuitBreakerManager::new(Arc::clone(&clock)),
            limiters: RateLimiterManager::new(Arc::clone(&clock)),
            pools: Arc::new(ConnectionPoolManager::new(factory)),
            cache: ResultCache::new(cache_backend, clock),
            health,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Build a client from a loaded configuration, registering its servers.
    pub async fn from_config(config: Config) -> ToolGateResult<Self> {
        let client = Self::new(config.global);
        for endpoint in config.servers {
            client.register_server(endpoint).await?;
        }
        Ok(client)
    }

    /// Register a tool server. Re-registration under the same name replaces
    /// the spec and resets the server's breaker, limiter and pool state.
    pub async fn register_server(&self, spec: ServerEndpoint) -> ToolGateResult<()> {
        let name = spec.name.clone();
        let replacing = self.registry.contains(&name);

        self.registry.register(spec.clone())?;

        if replacing {
            info!("re-registering server '{}', resetting its state", name);
            self.breakers.remove(&name);
            self.limiters.remove(&name);
        }
        self.pools.replace(&spec).await;
        Ok(())
    }

    /// Remove a server, shutting down its pool and dropping its breaker and
    /// limiter state. Returns false when no such server was registered.
    pub async fn unregister_server(&self, name: &str) -> bool {
        if !self.registry.unregister(name) {
            return false;
        }
        info!("unregistered server '{}'", name);
        self.breakers.remove(name);
        self.limiters.remove(name);
        self.pools.remove(name).await;
        true
    }

    /// Start background health probing.
    pub fn start_health_monitor(&self) {
        self.health.start();
    }

    pub fn stop_health_monitor(&self) {
        self.health.stop();
    }

    /// Start the background reaper that closes connections idle past
    /// `max_idle`.
    pub fn start_pool_reaper(&self, interval: Duration, max_idle: Duration) {
        self.pools.start_reaper(interval, max_idle);
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn get_server_health(&self, name: &str) -> Option<HealthRecord> {
        self.health.get_server_health(name)
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        self.health.get_health_summary()
    }

    pub fn get_pool_stats(&self) -> Vec<PoolStats> {
        self.pools.all_stats()
    }

    pub fn get_metrics_snapshot(&self) -> Value {
        self.metrics.snapshot()
    }

    /// Metrics in the configured exposition format.
    pub fn export_metrics(&self) -> String {
        match self.global.metrics_export_format {
            MetricsFormat::Prometheus => self.metrics.export_prometheus(),
            MetricsFormat::Json => self.metrics.snapshot().to_string(),
        }
    }

    /// Invoke a tool on a server or on the primary server of a service type.
    ///
    /// `target` is first matched against registered server names, then
    /// treated as a service type resolved through the health monitor. The
    /// caller's `deadline` bounds the whole pipeline: gating, pool wait and
    /// remote execution.
    pub async fn invoke_tool(
        &self,
        target: &str,
        tool_name: &str,
        params: Value,
        deadline: Duration,
    ) -> ToolGateResult<ToolResult> {
        let started = Instant::now();
        self.metrics.increment_counter("requests_total");

        let server = self.resolve_target(target)?;

        let first_attempt = self
            .invoke_on_server(&server, tool_name, &params, started, deadline)
            .await;

        let error = match first_attempt {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !(self.global.failover_enabled && error.is_transient()) {
            return Err(error);
        }

        let service_type = self.registry.get(&server)?.service_type.clone();
        let alternate = self
            .health
            .healthy_alternates(&service_type, &server)
            .into_iter()
            .next();

        let alternate = match alternate {
            Some(name) => name,
            None => return Err(error),
        };

        warn!(
            "failing over from '{}' to '{}' after: {}",
            server, alternate, error
        );
        self.metrics.increment_counter("failovers_total");

        self.invoke_on_server(&alternate, tool_name, &params, started, deadline)
            .await
            .map(|mut result| {
                result.fallback_used = true;
                result
            })
    }

    /// Resolve a target as a server name, falling back to primary-server
    /// lookup for service types.
    fn resolve_target(&self, target: &str) -> ToolGateResult<String> {
        if self.registry.contains(target) {
            return Ok(target.to_string());
        }
        self.health
            .get_primary_server(target)
            .ok_or_else(|| ToolGateError::ServerNotRegistered(target.to_string()))
    }

    async fn invoke_on_server(
        &self,
        server: &str,
        tool_name: &str,
        params: &Value,
        started: Instant,
        deadline: Duration,
    ) -> ToolGateResult<ToolResult> {
        let endpoint = self.registry.get(server)?;
        if !endpoint.enabled {
            return Err(ToolGateError::ServerNotRegistered(format!(
                "{} (disabled)",
                server
            )));
        }

        // Step 1: a live cache entry short-circuits everything.
        let key = ResultCache::cache_key(server, tool_name, params);
        if let Some(value) = self.cache.get(&key).await {
            debug!("cache hit for {}", key);
            self.metrics.increment_counter("cache_hits");
            return Ok(ToolResult {
                server: server.to_string(),
                tool_name: tool_name.to_string(),
                value,
                cached: true,
                fallback_used: false,
                latency_ms: 0,
            });
        }
        self.metrics.increment_counter("cache_misses");

        // Step 2: circuit breaker gate.
        let breaker = self.breakers.get_or_create(
            server,
            CircuitBreakerConfig {
                failure_threshold: endpoint.failure_threshold,
                recovery_timeout: endpoint.recovery_timeout(),
                half_open_max_calls: endpoint.half_open_max_calls,
            },
        );
        if let ExecutionGate::Deny { retry_in } = breaker.can_execute() {
            self.metrics.increment_counter("circuit_rejections");
            return Err(ToolGateError::CircuitOpen {
                server: server.to_string(),
                retry_in_ms: retry_in.as_millis() as u64,
            });
        }

        // Step 3: admission control. Non-blocking reject by default.
        let limiter = self.limiters.get_or_create(
            server,
            RateLimiterConfig {
                capacity: endpoint.rate_limit_per_second,
                refill_rate: endpoint.rate_limit_per_second,
            },
        );
        if !limiter.try_acquire() {
            self.metrics.increment_counter("rate_limit_rejections");
            return Err(ToolGateError::RateLimitExceeded(server.to_string()));
        }

        // Step 4: connection acquisition, bounded by the connection timeout
        // and the caller's remaining deadline.
        let remaining = match deadline.checked_sub(started.elapsed()) {
            Some(d) if !d.is_zero() => d,
            _ => {
                let err = ToolGateError::Timeout(deadline.as_millis() as u64);
                breaker.record_failure();
                self.record_failure_metrics(server, started);
                return Err(err);
            }
        };

        let pool = self.pools.get_or_create(&endpoint);
        let guard = match pool
            .acquire(endpoint.connection_timeout().min(remaining))
            .await
        {
            Ok(guard) => guard,
            Err(err) => {
                if err.counts_as_breaker_failure() {
                    breaker.record_failure();
                }
                self.record_failure_metrics(server, started);
                return Err(err);
            }
        };

        // Step 5: remote execution under the remaining deadline.
        let remaining = match deadline.checked_sub(started.elapsed()) {
            Some(d) if !d.is_zero() => d,
            _ => {
                pool.release(guard, false).await;
                breaker.record_failure();
                self.record_failure_metrics(server, started);
                return Err(ToolGateError::Timeout(deadline.as_millis() as u64));
            }
        };

        let request = JsonRpcRequest::tool_call(tool_name, params.clone());
        let outcome =
            tokio::time::timeout(remaining, guard.conn.connection().execute(request)).await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                // Step 7: transport failure. Drop the connection; the pool
                // recreates lazily.
                pool.release(guard, false).await;
                if err.counts_as_breaker_failure() {
                    breaker.record_failure();
                }
                self.record_failure_metrics(server, started);
                return Err(err);
            }
            Err(_) => {
                pool.release(guard, false).await;
                breaker.record_failure();
                self.record_failure_metrics(server, started);
                return Err(ToolGateError::Timeout(remaining.as_millis() as u64));
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;

        if let Some(rpc_error) = response.error {
            // The tool ran and reported a domain failure: the server is
            // reachable, so the connection returns healthy and the breaker
            // is not charged.
            pool.release(guard, true).await;
            breaker.record_success();
            self.metrics.record_request(server, false, latency_ms as f64);
            self.metrics.increment_counter("tool_execution_errors");
            return Err(ToolGateError::ToolExecution {
                server: server.to_string(),
                tool: tool_name.to_string(),
                message: rpc_error.message,
            });
        }

        // Step 6: success path.
        let value = response.result.unwrap_or(Value::Null);
        pool.release(guard, true).await;
        breaker.record_success();
        self.cache
            .set(key, value.clone(), endpoint.cache_ttl())
            .await;
        self.metrics.record_request(server, true, latency_ms as f64);
        self.metrics
            .record_histogram("invoke_latency_ms", latency_ms as f64);

        Ok(ToolResult {
            server: server.to_string(),
            tool_name: tool_name.to_string(),
            value,
            cached: false,
            fallback_used: false,
            latency_ms,
        })
    }

    fn record_failure_metrics(&self, server: &str, started: Instant) {
        let latency_ms = started.elapsed().as_millis() as f64;
        self.metrics.record_request(server, false, latency_ms);
    }

    /// Stop background tasks and dispose every pooled connection.
    pub async fn shutdown(&self) {
        self.health.stop();
        self.pools.shutdown().await;
        info!("tool client shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_target_is_not_registered() {
        let client = ToolClient::new(GlobalConfig::default());
        let err = client
            .invoke_tool("ghost", "search", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SERVER_NOT_REGISTERED");
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_spec() {
        let client = ToolClient::new(GlobalConfig::default());
        let bad = ServerEndpoint {
            name: "s1".to_string(),
            address: "carrier-pigeon://coop".to_string(),
            ..Default::default()
        };
        assert!(client.register_server(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_unregister_removes_server() {
        let client = ToolClient::new(GlobalConfig::default());
        client
            .register_server(ServerEndpoint {
                name: "s1".to_string(),
                address: "tcp://localhost:9000".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(client.unregister_server("s1").await);
        assert!(!client.unregister_server("s1").await);
        assert!(client.get_pool_stats().is_empty());

        let err = client
            .invoke_tool("s1", "search", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SERVER_NOT_REGISTERED");
    }

    #[tokio::test]
    async fn test_pool_stats_present_after_registration() {
        let client = ToolClient::new(GlobalConfig::default());
        client
            .register_server(ServerEndpoint {
                name: "s1".to_string(),
                address: "tcp://localhost:9000".to_string(),
                service_type: "search".to_string(),
                max_connections: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        let stats = client.get_pool_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].max_connections, 3);
        assert_eq!(stats[0].active, 0);
    }
}
