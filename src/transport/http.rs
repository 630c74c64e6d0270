//! HTTP transport: JSON-RPC over POST, one request per response

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::traits::Connection;
use crate::utils::errors::{ToolGateError, ToolGateResult};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;
use url::Url;

pub struct HttpConnection {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpConnection {
    pub fn new(endpoint: &str) -> ToolGateResult<Self> {
        let endpoint = endpoint
            .parse::<Url>()
            .map_err(|e| ToolGateError::Connection(format!("invalid URL: {}", e)))?;

        // No client-level timeout: the invoke pipeline bounds every call with
        // the caller's remaining deadline.
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| ToolGateError::Connection(e.to_string()))?;

        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn execute(&self, request: JsonRpcRequest) -> ToolGateResult<JsonRpcResponse> {
        debug!("http sending {} to {}", request.method, self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolGateError::Connection(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ToolGateError::Connection(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| ToolGateError::Connection(format!("invalid response body: {}", e)))
    }

    async fn is_alive(&self) -> bool {
        // Stateless transport; liveness is decided per request.
        true
    }

    async fn close(&self) -> ToolGateResult<()> {
        Ok(())
    }
}
