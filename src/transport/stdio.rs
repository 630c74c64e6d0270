//! Pipe transport: tool server as a child process speaking newline-delimited
//! JSON-RPC over stdin/stdout

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::transport::traits::Connection;
use crate::utils::errors::{ToolGateError, ToolGateResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct StdioConnection {
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    alive: Arc<RwLock<bool>>,
}

impl StdioConnection {
    pub async fn spawn(command: &str, args: &[String]) -> ToolGateResult<Self> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolGateError::Connection(format!("failed to spawn {}: {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolGateError::Connection("failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolGateError::Connection("failed to open stdout".to_string()))?;

        let connection = Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Arc::new(Mutex::new(stdin)),
            pending: Arc::new(DashMap::new()),
            alive: Arc::new(RwLock::new(true)),
        };

        connection.start_reader(stdout);

        Ok(connection)
    }

    fn start_reader(&self, stdout: ChildStdout) {
        let pending = self.pending.clone();
        let alive = self.alive.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stdio received: {}", line);

                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => {
                        if let Some(id) = response.id.clone() {
                            if let Some((_, tx)) = pending.remove(&id) {
                                let _ = tx.send(response);
                            } else {
                                warn!("stdio response with unknown id: {:?}", id);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("failed to parse stdio response: {}", e);
                    }
                }
            }

            info!("stdio reader task ended");
            *alive.write().await = false;
            pending.clear();
        });
    }
}

#[async_trait]
impl Connection for StdioConnection {
    async fn execute(&self, request: JsonRpcRequest) -> ToolGateResult<JsonRpcResponse> {
        if !self.is_alive().await {
            return Err(ToolGateError::Connection(
                "stdio connection closed".to_string(),
            ));
        }

        let request_id = request
            .id
            .clone()
            .ok_or_else(|| ToolGateError::Connection("request missing id".to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let json = serde_json::to_string(&request)?;
        debug!("stdio sending: {}", json);

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(json.as_bytes()).await {
                self.pending.remove(&request_id);
                return Err(ToolGateError::Io(e));
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                self.pending.remove(&request_id);
                return Err(ToolGateError::Io(e));
            }
            if let Err(e) = stdin.flush().await {
                self.pending.remove(&request_id);
                return Err(ToolGateError::Io(e));
            }
        }

        match rx.await {
            Ok(response) => Ok(response),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(ToolGateError::Connection(
                    "response channel closed".to_string(),
                ))
            }
        }
    }

    async fn is_alive(&self) -> bool {
        *self.alive.read().await
    }

    async fn close(&self) -> ToolGateResult<()> {
        let mut child = self.child.lock().await;

        if let Err(e) = child.start_kill() {
            warn!("failed to kill child process: {}", e);
        }

        match tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => debug!("child process exited with {:?}", status),
            Ok(Err(e)) => warn!("failed to wait for child: {}", e),
            Err(_) => warn!("timeout waiting for child process"),
        }

        *self.alive.write().await = false;
        self.pending.clear();
        Ok(())
    }
}
