//! Circuit breaker gating calls to failing servers
//!
//! Pure state machine per server: no I/O, all time reads through the injected
//! clock, and the lock covers only the in-memory transition. Given the same
//! ordered success/failure events and the same clock, the final state is
//! always identical.

use crate::utils::clock::SharedClock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Failure threshold reached - calls are rejected
    Open,
    /// Probing whether the server has recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker tunables, taken from the server endpoint spec
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive connectivity failures before opening
    pub failure_threshold: u32,
    /// How long an open circuit rejects before allowing a trial
    pub recovery_timeout: Duration,
    /// Successful trials required in half-open before closing
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_success_count: u32,
    next_retry_time: Option<Instant>,
}

/// Outcome of the admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionGate {
    Allow,
    /// Rejected; the circuit stays open for at least this long
    Deny { retry_in: Duration },
}

/// Circuit breaker for a single server
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_success_count: 0,
                next_retry_time: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Check whether a call may be attempted. An open circuit whose recovery
    /// timeout has elapsed transitions to half-open and admits the call as a
    /// trial.
    pub fn can_execute(&self) -> ExecutionGate {
        let now = self.clock.now();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => ExecutionGate::Allow,
            CircuitState::Open => {
                let retry_at = match state.next_retry_time {
                    Some(t) => t,
                    None => return ExecutionGate::Allow,
                };

                if now >= retry_at {
                    state.state = CircuitState::HalfOpen;
                    state.half_open_success_count = 0;
                    info!("circuit breaker '{}' transitioned to half-open", self.name);
                    ExecutionGate::Allow
                } else {
                    ExecutionGate::Deny {
                        retry_in: retry_at - now,
                    }
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_success_count += 1;
                if state.half_open_success_count >= self.config.half_open_max_calls {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.half_open_success_count = 0;
                    state.next_retry_time = None;
                    info!("circuit breaker '{}' closed after recovery", self.name);
                }
            }
            CircuitState::Open => {
                // A call that started before the circuit opened; counts for
                // nothing until a trial is admitted.
            }
        }
    }

    /// Record a connectivity failure.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.next_retry_time = Some(now + self.config.recovery_timeout);
                    warn!(
                        "circuit breaker '{}' opened after {} failures",
                        self.name, state.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any single trial failure reopens with a fresh timeout.
                state.state = CircuitState::Open;
                state.half_open_success_count = 0;
                state.next_retry_time = Some(now + self.config.recovery_timeout);
                warn!(
                    "circuit breaker '{}' re-opened after failure in half-open state",
                    self.name
                );
            }
            CircuitState::Open => {}
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            half_open_success_count: state.half_open_success_count,
        }
    }

    /// Manual intervention: force the circuit closed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.half_open_success_count = 0;
        state.next_retry_time = None;
        info!("circuit breaker '{}' manually reset", self.name);
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_success_count: u32,
}

/// One breaker per registered server
pub struct CircuitBreakerManager {
    breakers: dashmap::DashMap<String, Arc<CircuitBreaker>>,
    clock: SharedClock,
}

impl CircuitBreakerManager {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
            clock,
        }
    }

    pub fn get_or_create(
        &self,
        server_name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(server_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    server_name,
                    config,
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    /// Drop breaker state for a server, e.g. on re-registration.
    pub fn remove(&self, server_name: &str) {
        self.breakers.remove(server_name);
    }

    pub fn all_stats(&self) -> std::collections::HashMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;

    fn breaker(threshold: u32, recovery_secs: u64, half_open: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
                half_open_max_calls: half_open,
            },
            Arc::new(clock.clone()),
        );
        (cb, clock)
    }

    #[test]
    fn test_starts_closed() {
        let (cb, _clock) = breaker(3, 60, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.can_execute(), ExecutionGate::Allow);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let (cb, _clock) = breaker(3, 60, 2);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.can_execute(), ExecutionGate::Deny { .. }));
    }

    #[test]
    fn test_success_resets_closed_failure_count() {
        let (cb, _clock) = breaker(3, 60, 2);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        // Counter restarted, so two more failures still do not open it.
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let (cb, clock) = breaker(1, 60, 2);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(59));
        assert!(matches!(cb.can_execute(), ExecutionGate::Deny { .. }));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cb.can_execute(), ExecutionGate::Allow);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_timeout() {
        let (cb, clock) = breaker(1, 60, 2);

        cb.record_failure();
        clock.advance(Duration::from_secs(61));
        assert_eq!(cb.can_execute(), ExecutionGate::Allow);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // The retry window restarts from the half-open failure.
        clock.advance(Duration::from_secs(30));
        assert!(matches!(cb.can_execute(), ExecutionGate::Deny { .. }));
        clock.advance(Duration::from_secs(31));
        assert_eq!(cb.can_execute(), ExecutionGate::Allow);
    }

    #[test]
    fn test_closes_after_half_open_successes() {
        let (cb, clock) = breaker(1, 60, 2);

        cb.record_failure();
        clock.advance(Duration::from_secs(61));
        assert_eq!(cb.can_execute(), ExecutionGate::Allow);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[test]
    fn test_deterministic_replay() {
        // Identical event sequences under identical clocks end identically.
        let run = || {
            let (cb, clock) = breaker(2, 30, 1);
            cb.record_failure();
            cb.record_failure();
            clock.advance(Duration::from_secs(31));
            let _ = cb.can_execute();
            cb.record_success();
            cb.record_failure();
            cb.record_failure();
            cb.stats()
        };

        let a = run();
        let b = run();
        assert_eq!(a.state, b.state);
        assert_eq!(a.failure_count, b.failure_count);
        assert_eq!(a.half_open_success_count, b.half_open_success_count);
    }

    #[test]
    fn test_manager_reuses_breaker_per_server() {
        let manager = CircuitBreakerManager::new(Arc::new(ManualClock::new()));
        let a = manager.get_or_create("s1", CircuitBreakerConfig::default());
        let b = manager.get_or_create("s1", CircuitBreakerConfig::default());
        assert!(Arc::ptr_eq(&a, &b));

        a.record_failure();
        assert_eq!(manager.all_stats()["s1"].failure_count, 1);
    }
}
