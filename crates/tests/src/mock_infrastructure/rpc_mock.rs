//! RPC Mock Builder for Ethereum JSON-RPC Testing
//!
//! Wraps mockito to answer the reads the pool issues: `eth_blockNumber` and `balanceOf`
//! through `eth_call`.

use chainpool_core::{
    pool::CacheTtls,
    upstream::{CircuitBreakerConfig, Provider},
    RpcPool,
};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Builder for mock Ethereum RPC endpoints.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl RpcMockBuilder {
    /// Creates a new RPC mock builder with a fresh mockito server.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Returns the URL of the mock server.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Mocks `eth_blockNumber`, expecting exactly `hits` calls when `hits` is set.
    pub fn mock_block_number_expecting(&mut self, block_number: u64, hits: Option<usize>) -> &mut Self {
        let mut mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#""method"\s*:\s*"eth_blockNumber""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(&json!(format!("0x{block_number:x}"))));
        if let Some(hits) = hits {
            mock = mock.expect(hits);
        }

        self.mocks.push(mock.create());
        self
    }

    /// Mocks an `eth_blockNumber` request.
    pub fn mock_block_number(&mut self, block_number: u64) -> &mut Self {
        self.mock_block_number_expecting(block_number, None)
    }

    /// Mocks `balanceOf(holder)` through `eth_call`, answering with a 32-byte word.
    pub fn mock_balance_of(&mut self, holder: &str, balance: u128) -> &mut Self {
        let holder = holder.trim_start_matches("0x").to_ascii_lowercase();
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""method"\s*:\s*"eth_call""#.to_string()),
                Matcher::Regex(format!(r#""data"\s*:\s*"0x{BALANCE_OF_SELECTOR}0{{24}}{holder}""#)),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(&json!(format!("0x{balance:064x}"))))
            .create();

        self.mocks.push(mock);
        self
    }

    /// Mocks an RPC error response.
    pub fn mock_rpc_error(&mut self, method: &str, code: i32, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {
                        "code": code,
                        "message": message
                    }
                })
                .to_string(),
            )
            .create();

        self.mocks.push(mock);
        self
    }

    /// Mocks a server error (500) for every request.
    pub fn mock_server_error(&mut self) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(500)
            .with_body("Internal Server Error")
            .create();

        self.mocks.push(mock);
        self
    }

    /// Mocks a 200 response whose body is not JSON.
    pub fn mock_garbage(&mut self) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("not json")
            .create();

        self.mocks.push(mock);
        self
    }

    /// Panics unless every mock was hit the number of times it expects.
    pub async fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }

    /// Whether at least one request reached any mock.
    pub async fn was_called(&self) -> bool {
        for mock in &self.mocks {
            if mock.matched_async().await {
                return true;
            }
        }
        false
    }
}

fn result_body(result: &Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result
    })
    .to_string()
}

/// Builds a pool over the HTTP transport with one provider per mock, in priority order.
///
/// # Panics
///
/// Panics if the pool fails to build.
#[allow(clippy::expect_used)]
pub fn pool_over(mocks: &[&RpcMockBuilder], breaker: CircuitBreakerConfig, ttls: CacheTtls) -> RpcPool {
    let providers = mocks
        .iter()
        .enumerate()
        .map(|(i, mock)| Provider::new(format!("provider-{i}"), mock.url(), i as u32 + 1))
        .collect();

    RpcPool::builder()
        .providers(providers)
        .circuit_breaker(breaker)
        .ttls(ttls)
        .build()
        .expect("pool should build over mock providers")
}
