use crate::config::ServerEndpoint;
use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::utils::errors::ToolGateResult;
use async_trait::async_trait;

/// One open transport channel to a tool server
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a request and wait for its response
    async fn execute(&self, request: JsonRpcRequest) -> ToolGateResult<JsonRpcResponse>;

    /// Check if the underlying channel is still usable
    async fn is_alive(&self) -> bool;

    /// Close the channel
    async fn close(&self) -> ToolGateResult<()>;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Connection")
    }
}

/// Opens connections for an endpoint; the pool calls this lazily and tests
/// substitute an in-memory implementation.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, endpoint: &ServerEndpoint) -> ToolGateResult<Box<dyn Connection>>;
}
