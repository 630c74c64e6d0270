//! Socket transport: newline-delimited JSON-RPC over TCP

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::transport::traits::Connection;
use crate::utils::errors::{ToolGateError, ToolGateResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

pub struct TcpConnection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    alive: Arc<RwLock<bool>>,
}

impl TcpConnection {
    pub async fn connect(host: &str, port: u16) -> ToolGateResult<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ToolGateError::Connection(format!("connect {}:{}: {}", host, port, e)))?;

        let (read_half, write_half) = stream.into_split();

        let connection = Self {
            writer: Arc::new(Mutex::new(write_half)),
            pending: Arc::new(DashMap::new()),
            alive: Arc::new(RwLock::new(true)),
        };

        connection.start_reader(read_half);

        Ok(connection)
    }

    fn start_reader(&self, read_half: OwnedReadHalf) {
        let pending = self.pending.clone();
        let alive = self.alive.clone();

        tokio::spawn(async move {
            let mut frames = FramedRead::new(read_half, LinesCodec::new());

            while let Some(frame) = frames.next().await {
                let line = match frame {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("tcp framing error: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                debug!("tcp received: {}", line);

                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => {
                        if let Some(id) = response.id.clone() {
                            if let Some((_, tx)) = pending.remove(&id) {
                                let _ = tx.send(response);
                            } else {
                                warn!("tcp response with unknown id: {:?}", id);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("failed to parse tcp response: {}", e);
                    }
                }
            }

            info!("tcp reader task ended");
            *alive.write().await = false;
            pending.clear();
        });
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn execute(&self, request: JsonRpcRequest) -> ToolGateResult<JsonRpcResponse> {
        if !self.is_alive().await {
            return Err(ToolGateError::Connection("tcp connection closed".to_string()));
        }

        let request_id = request
            .id
            .clone()
            .ok_or_else(|| ToolGateError::Connection("request missing id".to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let json = serde_json::to_string(&request)?;
        debug!("tcp sending: {}", json);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(json.as_bytes()).await {
                self.pending.remove(&request_id);
                return Err(ToolGateError::Io(e));
            }
            if let Err(e) = writer.write_all(b"\n").await {
                self.pending.remove(&request_id);
                return Err(ToolGateError::Io(e));
            }
            if let Err(e) = writer.flush().await {
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
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        *self.alive.write().await = false;
        self.pending.clear();
        Ok(())
    }
}
