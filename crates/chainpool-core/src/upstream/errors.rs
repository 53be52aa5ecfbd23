use thiserror::Error;

/// Errors produced by a single attempt against one upstream provider.
///
/// None of these escape the pool: the failover executor logs and counts them and moves on to
/// the next provider. They fall into three groups:
/// - [`UpstreamError::CircuitOpen`]: the breaker rejected the call, the provider was never hit
/// - [`UpstreamError::Timeout`]: the provider did not answer within the breaker timeout
/// - everything else: transport or remote failures reported by the provider client
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// Circuit breaker is open (or a half-open trial is already in flight).
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Failed to establish a connection to the upstream endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error occurred (non-2xx status code).
    ///
    /// First field is the HTTP status code, second is the (truncated) body.
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// JSON-RPC error object returned by the provider.
    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    /// Network-level error from the underlying HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response could not be parsed or carried an unexpected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built from the given arguments.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Returns `true` for a breaker rejection (the operation was never invoked).
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// Returns `true` if the provider exceeded its timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if the failure came from the provider itself (transport or remote error).
    #[must_use]
    pub fn is_provider_error(&self) -> bool {
        !self.is_circuit_open() && !self.is_timeout()
    }

    /// Returns a static string representation for metrics labels and logs.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(_, _) => "http_error",
            Self::RpcError(_, _) => "rpc_error",
            Self::Network(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Errors surfaced to callers of the pool.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PoolError {
    /// Every provider was skipped or failed and the fallback cache had no usable entry.
    #[error("All providers failed for {cache_key}")]
    AllProvidersFailed {
        /// Logical key of the call that could not be served.
        cache_key: String,
        /// Description of the last provider failure, if any provider was attempted.
        last_error: Option<String>,
    },

    /// A control operation named a provider that is not registered.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The caller's arguments were rejected before any provider was contacted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PoolError {
    /// Returns the cache key for [`PoolError::AllProvidersFailed`].
    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        match self {
            Self::AllProvidersFailed { cache_key, .. } => Some(cache_key),
            Self::UnknownProvider(_) | Self::InvalidInput(_) => None,
        }
    }
}
