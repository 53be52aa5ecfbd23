//! Provider-scoped client abstraction.
//!
//! The pool never talks to the network directly. For each provider it asks a
//! [`TransportFactory`] for a [`ProviderClient`] and runs caller-supplied operations against
//! it. The typed helpers on [`ProviderClient`] cover the reads the pool exposes; anything else
//! goes through [`ProviderClient::request`].

use async_trait::async_trait;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

use super::{errors::UpstreamError, provider::Provider};

/// `balanceOf(address)` selector, shared by ERC-20 and ERC-721.
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Per-client construction options handed to a [`TransportFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Request timeout enforced by the transport itself.
    pub timeout: Duration,
    /// Extra attempts the transport may make on transient failures.
    pub retry_count: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), retry_count: 0 }
    }
}

/// A callable client bound to one provider endpoint.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Sends a JSON-RPC request and returns its `result` member.
    async fn request(&self, method: &str, params: Value) -> Result<Value, UpstreamError>;

    /// Current block height (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64, UpstreamError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity_u64(&result)
    }

    /// ERC-20 `balanceOf(holder)` on `token`, in the token's smallest unit.
    async fn token_balance(&self, token: &str, holder: &str) -> Result<u128, UpstreamError> {
        let result = self.call_balance_of(token, holder).await?;
        parse_quantity_u128(&result)
    }

    /// ERC-721 `balanceOf(holder)` on `collection`: number of tokens owned.
    async fn nft_balance(&self, collection: &str, holder: &str) -> Result<u64, UpstreamError> {
        let result = self.call_balance_of(collection, holder).await?;
        parse_quantity_u64(&result)
    }

    #[doc(hidden)]
    async fn call_balance_of(&self, contract: &str, holder: &str) -> Result<Value, UpstreamError> {
        let data = encode_balance_of(holder)?;
        self.request("eth_call", json!([{ "to": contract, "data": data }, "latest"])).await
    }
}

/// Builds the [`ProviderClient`] for each provider at pool construction.
pub trait TransportFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if a client cannot be built for `provider` (e.g. malformed URL).
    fn create(
        &self,
        provider: &Provider,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ProviderClient>, UpstreamError>;
}

/// Hex digits of a `0x`-prefixed 20-byte address, or `None` if `value` is not one.
#[must_use]
pub fn address_hex(value: &str) -> Option<&str> {
    let hex = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    (hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit())).then_some(hex)
}

/// Encodes `balanceOf(holder)` call data.
///
/// # Errors
///
/// Returns [`UpstreamError::InvalidRequest`] if `holder` is not a 20-byte hex address.
pub fn encode_balance_of(holder: &str) -> Result<String, UpstreamError> {
    let hex = address_hex(holder)
        .ok_or_else(|| UpstreamError::InvalidRequest(format!("invalid address: {holder}")))?;
    Ok(format!("0x{BALANCE_OF_SELECTOR}{:0>64}", hex.to_ascii_lowercase()))
}

/// Parses a hex quantity or 32-byte word (`"0x1a"`, `"0x000...1a"`) into a `u128`.
///
/// # Errors
///
/// Returns [`UpstreamError::InvalidResponse`] for non-string values, empty results (`"0x"`),
/// non-hex digits, or values that don't fit in 128 bits.
pub fn parse_quantity_u128(value: &Value) -> Result<u128, UpstreamError> {
    let raw = value
        .as_str()
        .ok_or_else(|| UpstreamError::InvalidResponse(format!("expected hex string, got {value}")))?;
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| UpstreamError::InvalidResponse(format!("missing 0x prefix: {raw}")))?;
    if hex.is_empty() {
        return Err(UpstreamError::InvalidResponse("empty call result".to_string()));
    }

    let significant = hex.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Err(UpstreamError::InvalidResponse(format!("quantity overflows u128: {raw}")));
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| UpstreamError::InvalidResponse(format!("invalid hex quantity {raw}: {e}")))
}

/// Same as [`parse_quantity_u128`] but bounded to `u64`.
///
/// # Errors
///
/// Returns [`UpstreamError::InvalidResponse`] if the value is malformed or exceeds `u64`.
pub fn parse_quantity_u64(value: &Value) -> Result<u64, UpstreamError> {
    let wide = parse_quantity_u128(value)?;
    u64::try_from(wide)
        .map_err(|_| UpstreamError::InvalidResponse(format!("quantity overflows u64: {value}")))
}
