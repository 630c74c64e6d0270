//! toolgate: a resilient client for fleets of tool servers.
//!
//! Wraps every tool invocation in a pipeline of protective layers so that a
//! slow or failing server degrades gracefully instead of cascading:
//!
//! - per-server circuit breakers that fail fast while a server misbehaves
//! - token-bucket rate limiting at admission
//! - bounded connection pools with idle reuse
//! - a TTL result cache keyed by server, tool and canonicalized parameters
//! - background health probing with primary-server selection per service
//!   type and transparent failover to a healthy alternate
//!
//! [`ToolClient`] is the entry point:
//!
//! ```no_run
//! use std::time::Duration;
//! use toolgate::{GlobalConfig, ServerEndpoint, ToolClient};
//!
//! # async fn run() -> Result<(), toolgate::ToolGateError> {
//! let client = ToolClient::new(GlobalConfig::default());
//! client
//!     .register_server(ServerEndpoint {
//!         name: "search-1".into(),
//!         address: "http://localhost:8080/rpc".into(),
//!         service_type: "search".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! client.start_health_monitor();
//!
//! let result = client
//!     .invoke_tool(
//!         "search-1",
//!         "web_search",
//!         serde_json::json!({"query": "rust"}),
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! println!("{}", result.value);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod core;
pub mod transport;
pub mod utils;

pub use cache::{CacheBackend, InMemoryBackend, ResultCache};
pub use client::ToolClient;
pub use config::{load_config, parse_config, Config, GlobalConfig, MetricsFormat, ServerEndpoint};
pub use core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use core::health::{HealthMonitor, HealthRecord, HealthStatus, HealthSummary};
pub use core::pool::{ConnectionPool, PoolStats};
pub use core::protocol::{JsonRpcRequest, JsonRpcResponse, ToolResult};
pub use core::rate_limiter::{RateLimiter, RateLimiterConfig};
pub use core::registry::ServerRegistry;
pub use transport::{Connection, ConnectionFactory, DefaultConnectionFactory};
pub use utils::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use utils::errors::{ToolGateError, ToolGateResult};
pub use utils::logging::{init_logging, LogFormat};
pub use utils::metrics::MetricsCollector;
