pub mod circuit_breaker;
pub mod health;
pub mod pool;
pub mod protocol;
pub mod rate_limiter;
pub mod registry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitState, ExecutionGate,
};
pub use health::{HealthMonitor, HealthRecord, HealthStatus, HealthSummary};
pub use pool::{ConnectionPool, ConnectionPoolManager, PoolGuard, PoolStats, PooledConnection};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, ToolResult};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterManager};
pub use registry::ServerRegistry;
