use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolGateError {
    #[error("server not registered: {0}")]
    ServerNotRegistered(String),

    #[error("circuit open for server '{server}', retry in {retry_in_ms}ms")]
    CircuitOpen { server: String, retry_in_ms: u64 },

    #[error("rate limit exceeded for server '{0}'")]
    RateLimitExceeded(String),

    #[error("connection pool exhausted for server '{0}'")]
    PoolExhausted(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("tool '{tool}' on server '{server}' failed: {message}")]
    ToolExecution {
        server: String,
        tool: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolGateError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ServerNotRegistered(_) => "SERVER_NOT_REGISTERED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            Self::PoolExhausted(_) => "POOL_EXHAUSTED",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this failure counts toward circuit breaker tripping.
    ///
    /// Only connectivity-class failures do. Gating rejections never reach the
    /// network, and a tool that ran but reported a domain failure proves the
    /// server itself is reachable.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted(_) | Self::Connection(_) | Self::Timeout(_) | Self::Io(_)
        )
    }

    /// Transient errors may be retried once against an alternate server of
    /// the same service type when failover is enabled. A tripped breaker is
    /// transient too: the whole point of an alternate is to serve while the
    /// primary recovers.
    pub fn is_transient(&self) -> bool {
        self.counts_as_breaker_failure() || matches!(self, Self::CircuitOpen { .. })
    }
}

pub type ToolGateResult<T> = Result<T, ToolGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ToolGateError::ServerNotRegistered("s1".to_string()).error_code(),
            "SERVER_NOT_REGISTERED"
        );
        assert_eq!(
            ToolGateError::CircuitOpen {
                server: "s1".to_string(),
                retry_in_ms: 500,
            }
            .error_code(),
            "CIRCUIT_OPEN"
        );
        assert_eq!(ToolGateError::Timeout(5000).error_code(), "TIMEOUT");
    }

    #[test]
    fn test_breaker_accounting_policy() {
        assert!(ToolGateError::Connection("refused".to_string()).counts_as_breaker_failure());
        assert!(ToolGateError::Timeout(100).counts_as_breaker_failure());
        assert!(ToolGateError::PoolExhausted("s1".to_string()).counts_as_breaker_failure());

        // Gating and domain errors never trip the breaker.
        assert!(!ToolGateError::RateLimitExceeded("s1".to_string()).counts_as_breaker_failure());
        assert!(!ToolGateError::ToolExecution {
            server: "s1".to_string(),
            tool: "search".to_string(),
            message: "no results".to_string(),
        }
        .counts_as_breaker_failure());
        assert!(!ToolGateError::ServerNotRegistered("s1".to_string()).counts_as_breaker_failure());
    }

    #[test]
    fn test_circuit_open_is_transient_but_not_a_failure() {
        let err = ToolGateError::CircuitOpen {
            server: "s1".to_string(),
            retry_in_ms: 500,
        };
        assert!(err.is_transient());
        assert!(!err.counts_as_breaker_failure());
    }
}
