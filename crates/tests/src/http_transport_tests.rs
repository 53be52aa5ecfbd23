//! The `reqwest` client against mock providers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::mock_infrastructure::RpcMockBuilder;
use chainpool_core::upstream::{
    ClientOptions, HttpTransportFactory, Provider, ProviderClient, TransportFactory, UpstreamError,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn client_for(url: String, retry_count: u32) -> Arc<dyn ProviderClient> {
    let factory = HttpTransportFactory::new().unwrap();
    let options = ClientOptions { timeout: Duration::from_secs(5), retry_count };
    factory.create(&Provider::new("mock", url, 1), &options).unwrap()
}

#[tokio::test]
async fn test_block_number_decoded() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number(0x1b4);

    let client = client_for(mock.url(), 0);
    assert_eq!(client.block_number().await.unwrap(), 436);
}

#[tokio::test]
async fn test_raw_request_returns_result_member() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number(16);

    let client = client_for(mock.url(), 0);
    assert_eq!(client.request("eth_blockNumber", json!([])).await.unwrap(), json!("0x10"));
}

#[tokio::test]
async fn test_rpc_error_classified() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error("eth_blockNumber", -32005, "limit exceeded");

    let client = client_for(mock.url(), 0);
    match client.block_number().await {
        Err(UpstreamError::RpcError(code, message)) => {
            assert_eq!(code, -32005);
            assert_eq!(message, "limit exceeded");
        }
        other => panic!("expected RpcError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_error_classified() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_server_error();

    let client = client_for(mock.url(), 0);
    let err = client.block_number().await.unwrap_err();
    assert!(matches!(err, UpstreamError::HttpError(500, _)), "got {err:?}");
    assert!(err.is_provider_error());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_server_error();

    let client = client_for(mock.url(), 1);
    let err = client.block_number().await.unwrap_err();
    assert!(matches!(err, UpstreamError::HttpError(500, _)));
}

#[tokio::test]
async fn test_non_json_body_is_invalid_response() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_garbage();

    let client = client_for(mock.url(), 0);
    let err = client.block_number().await.unwrap_err();
    assert!(matches!(err, UpstreamError::InvalidResponse(_)), "got {err:?}");
}

#[tokio::test]
async fn test_balance_of_call_encoding() {
    let holder = "0x28C6c06298d514Db089934071355E5743bf21d60";
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_balance_of(holder, 123_456_789);

    let client = client_for(mock.url(), 0);
    let balance = client
        .token_balance("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", holder)
        .await
        .unwrap();
    assert_eq!(balance, 123_456_789);
    mock.assert_all().await;
}

#[tokio::test]
async fn test_invalid_holder_rejected_before_sending() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number(1);

    let client = client_for(mock.url(), 0);
    let err = client.token_balance("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "0x1234").await;
    assert!(matches!(err, Err(UpstreamError::InvalidRequest(_))));
    assert!(!mock.was_called().await);
}
