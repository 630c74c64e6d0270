pub mod http;
pub mod stdio;
pub mod tcp;
pub mod traits;

pub use http::HttpConnection;
pub use stdio::StdioConnection;
pub use tcp::TcpConnection;
pub use traits::{Connection, ConnectionFactory};

use crate::config::ServerEndpoint;
use crate::utils::errors::{ToolGateError, ToolGateResult};
use async_trait::async_trait;
use url::Url;

/// Opens the right connection variant for an endpoint's address scheme:
/// `stdio:<command> [args...]`, `http(s)://...` or `tcp://host:port`.
#[derive(Debug, Default, Clone)]
pub struct DefaultConnectionFactory;

#[async_trait]
impl ConnectionFactory for DefaultConnectionFactory {
    async fn connect(&self, endpoint: &ServerEndpoint) -> ToolGateResult<Box<dyn Connection>> {
        let address = endpoint.address.as_str();

        if let Some(command_line) = address.strip_prefix("stdio:") {
            let mut parts = command_line.split_whitespace();
            let command = parts.next().ok_or_else(|| {
                ToolGateError::Config(format!("empty stdio command in '{}'", address))
            })?;
            let args: Vec<String> = parts.map(|s| s.to_string()).collect();
            return Ok(Box::new(StdioConnection::spawn(command, &args).await?));
        }

        if address.starts_with("http://") || address.starts_with("https://") {
            return Ok(Box::new(HttpConnection::new(address)?));
        }

        if address.starts_with("tcp://") {
            let url = address
                .parse::<Url>()
                .map_err(|e| ToolGateError::Config(format!("invalid tcp address: {}", e)))?;
            let host = url
                .host_str()
                .ok_or_else(|| ToolGateError::Config(format!("missing host in '{}'", address)))?;
            let port = url
                .port()
                .ok_or_else(|| ToolGateError::Config(format!("missing port in '{}'", address)))?;
            return Ok(Box::new(TcpConnection::connect(host, port).await?));
        }

        Err(ToolGateError::Config(format!(
            "unsupported address scheme: {}",
            address
        )))
    }
}
