//! JSON-RPC 2.0 wire types for talking to tool servers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID can be string or number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(next_request_id()),
            method: method.into(),
            params,
        }
    }

    /// Build a `tools/call` request for the given tool and arguments.
    pub fn tool_call(tool_name: &str, params: Value) -> Self {
        Self::new(
            "tools/call",
            Some(serde_json::json!({
                "name": tool_name,
                "arguments": params,
            })),
        )
    }

    /// Build the lightweight request used by health probes.
    pub fn ping() -> Self {
        Self::new("ping", None)
    }
}

fn next_request_id() -> RequestId {
    static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
    RequestId::Number(REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst) as i64)
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Result returned to the caller of `invoke_tool`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Server that actually served the call
    pub server: String,
    /// Tool name as invoked
    pub tool_name: String,
    /// Raw result value from the remote tool
    pub value: Value,
    /// True when served from the result cache without any network attempt
    pub cached: bool,
    /// True when the call was transparently retried against an alternate
    /// server of the same service type
    pub fallback_used: bool,
    /// End-to-end latency in milliseconds (0 for cache hits)
    pub latency_ms: u64,
}
