//! Scriptable in-memory transport shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use toolgate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use toolgate::{
    Connection, ConnectionFactory, GlobalConfig, ManualClock, ServerEndpoint, ToolClient,
    ToolGateError, ToolGateResult,
};

/// Per-server behavior knobs plus call counters.
#[derive(Default)]
pub struct ServerScript {
    /// Fail executes (and mark connections dead) while set.
    pub failing: AtomicBool,
    /// Return a JSON-RPC error object instead of a result while set.
    pub tool_error: AtomicBool,
    pub connects: AtomicUsize,
    pub executions: AtomicUsize,
}

impl ServerScript {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_tool_error(&self, on: bool) {
        self.tool_error.store(on, Ordering::SeqCst);
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    scripts: DashMap<String, Arc<ServerScript>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, server: &str) -> Arc<ServerScript> {
        self.scripts
            .entry(server.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self, endpoint: &ServerEndpoint) -> ToolGateResult<Box<dyn Connection>> {
        let script = self.script(&endpoint.name);
        script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection { script }))
    }
}

pub struct ScriptedConnection {
    script: Arc<ServerScript>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn execute(&self, request: JsonRpcRequest) -> ToolGateResult<JsonRpcResponse> {
        self.script.executions.fetch_add(1, Ordering::SeqCst);
        let id = request.id.unwrap_or(RequestId::Number(0));

        if self.script.failing.load(Ordering::SeqCst) {
            return Err(ToolGateError::Connection(
                "scripted connection failure".to_string(),
            ));
        }
        if self.script.tool_error.load(Ordering::SeqCst) {
            return Ok(JsonRpcResponse::error(id, -32000, "scripted tool error"));
        }
        Ok(JsonRpcResponse::success(
            id,
            json!({ "echo": request.params }),
        ))
    }

    async fn is_alive(&self) -> bool {
        !self.script.failing.load(Ordering::SeqCst)
    }

    async fn close(&self) -> ToolGateResult<()> {
        Ok(())
    }
}

/// Client wired to the scripted transport and a manual clock.
pub fn scripted_client(
    global: GlobalConfig,
) -> (ToolClient, Arc<ScriptedFactory>, Arc<ManualClock>) {
    let factory = ScriptedFactory::new();
    let clock = Arc::new(ManualClock::new());
    let client = ToolClient::with_parts(
        global,
        factory.clone(),
        Arc::new(toolgate::InMemoryBackend::new()),
        clock.clone(),
    );
    (client, factory, clock)
}

pub fn endpoint(name: &str, service_type: &str, priority: u32) -> ServerEndpoint {
    ServerEndpoint {
        name: name.to_string(),
        address: "tcp://localhost:9000".to_string(),
        service_type: service_type.to_string(),
        priority,
        ..Default::default()
    }
}
