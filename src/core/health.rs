//! Background health monitoring and primary-server selection
//!
//! One periodic task probes every registered server with a short, dedicated
//! timeout, classifies each as healthy/degraded/unhealthy from consecutive
//! probe outcomes, and picks a primary server per service type. Results are
//! published as an immutable snapshot swap so the invoke path reads without
//! ever waiting on probe execution.

use crate::config::GlobalConfig;
use crate::core::protocol::JsonRpcRequest;
use crate::core::registry::ServerRegistry;
use crate::transport::ConnectionFactory;
use crate::utils::clock::SharedClock;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Dedicated probe timeout, independent of per-call deadlines
const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Per-server probe history; updated only by the monitor
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub server_name: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(skip)]
    pub last_check_time: Option<Instant>,
    pub last_latency_ms: Option<u64>,
}

impl HealthRecord {
    fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            status: HealthStatus::Degraded,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_time: None,
            last_latency_ms: None,
        }
    }
}

/// Immutable published view: records plus the primary per service type
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub records: HashMap<String, HealthRecord>,
    pub primaries: HashMap<String, String>,
}

/// Aggregate view for operators
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub servers: Vec<HealthRecord>,
    pub primaries: HashMap<String, String>,
}

pub struct HealthMonitor {
    registry: Arc<ServerRegistry>,
    factory: Arc<dyn ConnectionFactory>,
    clock: SharedClock,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    interval: Duration,
    records: Mutex<HashMap<String, HealthRecord>>,
    snapshot: RwLock<Arc<HealthSnapshot>>,
    task: Mutex<Option<CancellationToken>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServerRegistry>,
        factory: Arc<dyn ConnectionFactory>,
        global: &GlobalConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            factory,
            clock,
            healthy_threshold: global.health_healthy_threshold.max(1),
            unhealthy_threshold: global.health_unhealthy_threshold.max(1),
            interval: Duration::from_millis(global.health_check_interval_ms),
            records: Mutex::new(HashMap::new()),
            snapshot: RwLock::new(Arc::new(HealthSnapshot::default())),
            task: Mutex::new(None),
        }
    }

    /// Start the periodic probe task. Idempotent: a second start replaces the
    /// running task.
    pub fn start(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.task.lock().replace(token.clone()) {
            previous.cancel();
        }

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("health monitor started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.probe_all_once().await;
                    }
                }
            }
            info!("health monitor stopped");
        });
    }

    pub fn stop(&self) {
        if let Some(token) = self.task.lock().take() {
            token.cancel();
        }
    }

    /// Run one probe round over every enabled registered server. Exposed so
    /// tests can drive rounds without a ticking task.
    pub async fn probe_all_once(&self) {
        let endpoints = self.registry.list();

        // Probes for different servers run concurrently; state is folded in
        // afterwards and published as one snapshot swap.
        let mut probes = tokio::task::JoinSet::new();
        for endpoint in endpoints {
            if !endpoint.enabled {
                continue;
            }
            let factory = Arc::clone(&self.factory);
            probes.spawn(async move {
                let name = endpoint.name.clone();
                let started = Instant::now();
                let outcome = tokio::time::timeout(PROBE_TIMEOUT, async {
                    let conn = factory.connect(&endpoint).await?;
                    let result = conn.execute(JsonRpcRequest::ping()).await;
                    let _ = conn.close().await;
                    result
                })
                .await;

                let latency_ms = started.elapsed().as_millis() as u64;
                let success = matches!(outcome, Ok(Ok(ref response)) if !response.is_error());
                (name, success, latency_ms)
            });
        }

        while let Some(joined) = probes.join_next().await {
            if let Ok((name, success, latency_ms)) = joined {
                self.record_probe(&name, success, latency_ms);
            }
        }

        self.publish();
    }

    fn record_probe(&self, server_name: &str, success: bool, latency_ms: u64) {
        let mut records = self.records.lock();
        let record = records
            .entry(server_name.to_string())
            .or_insert_with(|| HealthRecord::new(server_name));

        record.last_check_time = Some(self.clock.now());
        record.last_latency_ms = Some(latency_ms);

        if success {
            record.consecutive_successes += 1;
            record.consecutive_failures = 0;
        } else {
            record.consecutive_failures += 1;
            record.consecutive_successes = 0;
        }

        let previous = record.status;
        record.status = if record.consecutive_failures >= self.unhealthy_threshold {
            HealthStatus::Unhealthy
        } else if record.consecutive_successes >= self.healthy_threshold {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        if record.status != previous {
            if record.status == HealthStatus::Unhealthy {
                warn!(
                    "server '{}' transitioned {} -> {}",
                    server_name, previous, record.status
                );
            } else {
                info!(
                    "server '{}' transitioned {} -> {}",
                    server_name, previous, record.status
                );
            }
        } else {
            debug!(
                "probe {} for '{}' ({}ms)",
                if success { "ok" } else { "failed" },
                server_name,
                latency_ms
            );
        }
    }

    /// Rebuild and swap the published snapshot from current records.
    fn publish(&self) {
        let records = self.records.lock().clone();

        let mut service_types: Vec<String> = self
            .registry
            .list()
            .iter()
            .map(|endpoint| endpoint.service_type.clone())
            .collect();
        service_types.sort();
        service_types.dedup();

        let mut primaries = HashMap::new();
        for service_type in service_types {
            if let Some(primary) = self.select_primary(&service_type, &records) {
                primaries.insert(service_type, primary);
            }
        }

        *self.snapshot.write() = Arc::new(HealthSnapshot { records, primaries });
    }

    /// Highest-priority healthy server of the type; falls back to the
    /// highest-priority degraded one so routing still works before probes
    /// have converged.
    fn select_primary(
        &self,
        service_type: &str,
        records: &HashMap<String, HealthRecord>,
    ) -> Option<String> {
        let candidates = self.registry.by_service_type(service_type);

        let status_of = |name: &str| {
            records
                .get(name)
                .map(|r| r.status)
                .unwrap_or(HealthStatus::Degraded)
        };

        candidates
            .iter()
            .find(|endpoint| status_of(&endpoint.name) == HealthStatus::Healthy)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|endpoint| status_of(&endpoint.name) == HealthStatus::Degraded)
            })
            .map(|endpoint| endpoint.name.clone())
    }

    /// Lock-free-for-writers read of the current snapshot.
    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn get_server_health(&self, name: &str) -> Option<HealthRecord> {
        self.snapshot().records.get(name).cloned()
    }

    pub fn get_primary_server(&self, service_type: &str) -> Option<String> {
        self.snapshot().primaries.get(service_type).cloned()
    }

    /// Healthy alternates of a service type, primary-ordered, excluding one
    /// server. Used for transparent failover.
    pub fn healthy_alternates(&self, service_type: &str, excluding: &str) -> Vec<String> {
        let snapshot = self.snapshot();
        self.registry
            .by_service_type(service_type)
            .iter()
            .filter(|endpoint| endpoint.name != excluding)
            .filter(|endpoint| {
                matches!(
                    snapshot.records.get(&endpoint.name).map(|r| r.status),
                    Some(HealthStatus::Healthy)
                )
            })
            .map(|endpoint| endpoint.name.clone())
            .collect()
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        let snapshot = self.snapshot();
        let mut servers: Vec<HealthRecord> = snapshot.records.values().cloned().collect();
        servers.sort_by(|a, b| a.server_name.cmp(&b.server_name));

        HealthSummary {
            healthy: servers
                .iter()
                .filter(|r| r.status == HealthStatus::Healthy)
                .count(),
            degraded: servers
                .iter()
                .filter(|r| r.status == HealthStatus::Degraded)
                .count(),
            unhealthy: servers
                .iter()
                .filter(|r| r.status == HealthStatus::Unhealthy)
                .count(),
            servers,
            primaries: snapshot.primaries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerEndpoint;
    use crate::utils::clock::ManualClock;

    fn endpoint(name: &str, service_type: &str, priority: u32) -> ServerEndpoint {
        ServerEndpoint {
            name: name.to_string(),
            address: "tcp://localhost:9000".to_string(),
            service_type: service_type.to_string(),
            priority,
            ..Default::default()
        }
    }

    fn monitor(registry: Arc<ServerRegistry>) -> HealthMonitor {
        let global = GlobalConfig {
            health_healthy_threshold: 2,
            health_unhealthy_threshold: 3,
            ..Default::default()
        };
        HealthMonitor::new(
            registry,
            Arc::new(crate::transport::DefaultConnectionFactory),
            &global,
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn test_status_thresholds() {
        let registry = Arc::new(ServerRegistry::new());
        registry.register(endpoint("s1", "search", 10)).unwrap();
        let mon = monitor(registry);

        // One success is not enough for healthy.
        mon.record_probe("s1", true, 5);
        mon.publish();
        assert_eq!(
            mon.get_server_health("s1").unwrap().status,
            HealthStatus::Degraded
        );

        mon.record_probe("s1", true, 5);
        mon.publish();
        assert_eq!(
            mon.get_server_health("s1").unwrap().status,
            HealthStatus::Healthy
        );

        // Two failures: degraded, not yet unhealthy.
        mon.record_probe("s1", false, 5);
        mon.record_probe("s1", false, 5);
        mon.publish();
        assert_eq!(
            mon.get_server_health("s1").unwrap().status,
            HealthStatus::Degraded
        );

        mon.record_probe("s1", false, 5);
        mon.publish();
        assert_eq!(
            mon.get_server_health("s1").unwrap().status,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_primary_switches_after_unhealthy() {
        let registry = Arc::new(ServerRegistry::new());
        registry.register(endpoint("s1", "search", 10)).unwrap();
        registry.register(endpoint("s2", "search", 20)).unwrap();
        let mon = monitor(registry);

        for _ in 0..2 {
            mon.record_probe("s1", true, 5);
            mon.record_probe("s2", true, 5);
        }
        mon.publish();
        assert_eq!(mon.get_primary_server("search").unwrap(), "s1");

        // Three consecutive failed probes on the primary flip it.
        for _ in 0..3 {
            mon.record_probe("s1", false, 5);
        }
        mon.publish();
        assert_eq!(mon.get_primary_server("search").unwrap(), "s2");
        assert_eq!(
            mon.get_server_health("s1").unwrap().status,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_primary_falls_back_to_degraded_before_convergence() {
        let registry = Arc::new(ServerRegistry::new());
        registry.register(endpoint("s1", "search", 10)).unwrap();
        let mon = monitor(registry);

        mon.record_probe("s1", true, 5);
        mon.publish();
        assert_eq!(mon.get_primary_server("search").unwrap(), "s1");
    }

    #[test]
    fn test_healthy_alternates_excludes_failed_server() {
        let registry = Arc::new(ServerRegistry::new());
        registry.register(endpoint("s1", "search", 10)).unwrap();
        registry.register(endpoint("s2", "search", 20)).unwrap();
        registry.register(endpoint("s3", "search", 30)).unwrap();
        let mon = monitor(registry);

        for name in ["s1", "s2", "s3"] {
            mon.record_probe(name, true, 5);
            mon.record_probe(name, true, 5);
        }
        mon.publish();

        let alternates = mon.healthy_alternates("search", "s1");
        assert_eq!(alternates, vec!["s2", "s3"]);
    }

    #[test]
    fn test_summary_counts() {
        let registry = Arc::new(ServerRegistry::new());
        registry.register(endpoint("s1", "search", 10)).unwrap();
        registry.register(endpoint("s2", "embed", 10)).unwrap();
        let mon = monitor(registry);

        mon.record_probe("s1", true, 5);
        mon.record_probe("s1", true, 5);
        mon.record_probe("s2", false, 5);
        mon.publish();

        let summary = mon.get_health_summary();
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.degraded, 1);
        assert_eq!(summary.unhealthy, 0);
        assert_eq!(summary.servers.len(), 2);
    }
}
