use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    errors::UpstreamError,
    provider::Provider,
    transport::{ClientOptions, ProviderClient, TransportFactory},
};

/// Maximum number of response body bytes kept in an [`UpstreamError::HttpError`].
const MAX_ERROR_BODY_LEN: usize = 256;

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// JSON-RPC over HTTP client bound to one provider URL.
///
/// Clients built by the same [`HttpTransportFactory`] share one `reqwest` connection pool.
pub struct HttpClient {
    client: Client,
    url: String,
    options: ClientOptions,
    next_id: AtomicU64,
}

impl HttpClient {
    #[must_use]
    pub fn new(client: Client, url: impl Into<String>, options: ClientOptions) -> Self {
        Self { client, url: url.into(), options, next_id: AtomicU64::new(1) }
    }

    /// Sanitizes network errors to prevent information disclosure.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else {
            "network error".to_string()
        }
    }

    fn retry_delay(attempt: u32) -> Duration {
        Duration::from_millis(100 * (1 << attempt.min(6)))
    }

    /// Posts `body` and returns the raw response bytes, retrying transient failures up to
    /// `retry_count` times.
    async fn post(&self, body: bytes::Bytes) -> Result<bytes::Bytes, UpstreamError> {
        let mut retries = 0;

        loop {
            let result = self
                .client
                .post(&self.url)
                .header("content-type", "application/json")
                .body(body.clone())
                .timeout(self.options.timeout)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return response.bytes().await.map_err(UpstreamError::Network);
                }
                Ok(response)
                    if response.status().is_server_error() && retries < self.options.retry_count =>
                {
                    retries += 1;
                    tracing::debug!(
                        url = %self.url,
                        status = response.status().as_u16(),
                        retry = retries,
                        "retrying after server error"
                    );
                    tokio::time::sleep(Self::retry_delay(retries)).await;
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let mut text = response.text().await.unwrap_or_default();
                    if text.len() > MAX_ERROR_BODY_LEN {
                        let mut cut = MAX_ERROR_BODY_LEN;
                        while !text.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        text.truncate(cut);
                        text.push_str("... (truncated)");
                    }
                    return Err(UpstreamError::HttpError(status, text));
                }
                Err(e) if e.is_timeout() => return Err(UpstreamError::Timeout),
                Err(e) if retries < self.options.retry_count => {
                    retries += 1;
                    tracing::debug!(
                        url = %self.url,
                        error = %Self::sanitize_network_error(&e),
                        retry = retries,
                        "retrying after transport error"
                    );
                    tokio::time::sleep(Self::retry_delay(retries)).await;
                }
                Err(e) => {
                    if e.is_connect() {
                        return Err(UpstreamError::ConnectionFailed(Self::sanitize_network_error(
                            &e,
                        )));
                    }
                    return Err(UpstreamError::Network(e));
                }
            }
        }
    }
}

#[async_trait]
impl ProviderClient for HttpClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .map_err(|e| UpstreamError::InvalidResponse(format!("failed to serialize request: {e}")))?;

        let bytes = self.post(bytes::Bytes::from(body)).await?;

        let response: RpcResponse = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;

        if let Some(error) = response.error {
            return Err(UpstreamError::RpcError(error.code, error.message));
        }

        response
            .result
            .ok_or_else(|| UpstreamError::InvalidResponse("missing result".to_string()))
    }
}

/// Builds an [`HttpClient`] per provider over a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransportFactory {
    client: Client,
}

impl HttpTransportFactory {
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("chainpool/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self { client })
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        provider: &Provider,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ProviderClient>, UpstreamError> {
        let parsed = url::Url::parse(&provider.url).map_err(|e| {
            UpstreamError::ConnectionFailed(format!("invalid url for {}: {e}", provider.name))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UpstreamError::ConnectionFailed(format!(
                "unsupported url scheme '{}' for {}",
                parsed.scheme(),
                provider.name
            )));
        }

        Ok(Arc::new(HttpClient::new(self.client.clone(), provider.url.clone(), *options)))
    }
}
