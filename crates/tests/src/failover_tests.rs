//! Failover through the HTTP transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::mock_infrastructure::{pool_over, RpcMockBuilder};
use chainpool_core::{
    pool::{CacheTtls, RpcPoolBuilder},
    upstream::{CircuitBreakerConfig, Provider},
    CircuitState, PoolError,
};

fn lenient_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig { volume_threshold: 100, ..CircuitBreakerConfig::default() }
}

#[tokio::test]
async fn test_server_error_fails_over_to_next_provider() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_server_error();
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_block_number(0x1234);

    let pool = pool_over(&[&primary, &secondary], lenient_breaker(), CacheTtls::default());

    assert_eq!(pool.get_block_number().await.unwrap(), 0x1234);

    let metrics = pool.metrics();
    assert_eq!(metrics.provider("provider-0").failure_total(), 1);
    assert_eq!(metrics.provider("provider-1").success_total(), 1);
}

#[tokio::test]
async fn test_rpc_error_fails_over_to_next_provider() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_rpc_error("eth_blockNumber", -32005, "limit exceeded");
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_block_number(77);

    let pool = pool_over(&[&primary, &secondary], lenient_breaker(), CacheTtls::default());

    assert_eq!(pool.get_block_number().await.unwrap(), 77);
    assert!(primary.was_called().await);
}

#[tokio::test]
async fn test_malformed_response_fails_over() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_garbage();
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_block_number(5);

    let pool = pool_over(&[&primary, &secondary], lenient_breaker(), CacheTtls::default());

    assert_eq!(pool.get_block_number().await.unwrap(), 5);
}

#[tokio::test]
async fn test_unreachable_provider_fails_over() {
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_block_number(9);

    let pool = RpcPoolBuilder::new()
        .providers(vec![
            Provider::new("closed-port", "http://127.0.0.1:1", 1),
            Provider::new("mock", secondary.url(), 2),
        ])
        .circuit_breaker(lenient_breaker())
        .build()
        .unwrap();

    assert_eq!(pool.get_block_number().await.unwrap(), 9);
    assert_eq!(pool.metrics().provider("closed-port").failure_total(), 1);
}

#[tokio::test]
async fn test_lowest_priority_value_is_tried_first() {
    let mut first = RpcMockBuilder::new().await;
    first.mock_block_number_expecting(1, Some(2));
    let mut second = RpcMockBuilder::new().await;
    second.mock_block_number_expecting(2, Some(0));

    // Declared out of order on purpose.
    let pool = RpcPoolBuilder::new()
        .providers(vec![
            Provider::new("second", second.url(), 20),
            Provider::new("first", first.url(), 10),
        ])
        .build()
        .unwrap();

    assert_eq!(pool.get_block_number().await.unwrap(), 1);
    assert_eq!(pool.get_block_number().await.unwrap(), 1);

    first.assert_all().await;
    second.assert_all().await;
}

#[tokio::test]
async fn test_tripped_circuit_is_never_called() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_block_number_expecting(1, Some(0));
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_block_number(2);

    let pool = pool_over(&[&primary, &secondary], lenient_breaker(), CacheTtls::default());
    pool.trip_circuit("provider-0").unwrap();

    assert_eq!(pool.get_block_number().await.unwrap(), 2);
    primary.assert_all().await;

    let rejected = pool.metrics().provider("provider-0");
    assert_eq!(rejected.requests_total(), 0);
    assert_eq!(rejected.rejections_total(), 1);
}

#[tokio::test]
async fn test_repeated_failures_open_the_circuit() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_server_error();
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_block_number(3);

    let breaker = CircuitBreakerConfig {
        volume_threshold: 2,
        error_threshold_percentage: 50,
        ..CircuitBreakerConfig::default()
    };
    let pool = pool_over(&[&primary, &secondary], breaker, CacheTtls::default());

    for _ in 0..3 {
        assert_eq!(pool.get_block_number().await.unwrap(), 3);
    }

    let states = pool.circuit_states();
    assert_eq!(states[0].1, CircuitState::Open);
    assert_eq!(states[1].1, CircuitState::Closed);

    let primary_metrics = pool.metrics().provider("provider-0");
    assert_eq!(primary_metrics.requests_total(), 2);
    assert_eq!(primary_metrics.failure_total(), 2);
    assert_eq!(primary_metrics.rejections_total(), 1);
    assert_eq!(primary_metrics.state_changes_total(), 1);

    let text = pool.prometheus_metrics();
    assert!(text.contains("rpc_circuit_breaker_state{provider=\"provider-0\"} 2"));
}

#[tokio::test]
async fn test_balance_read_through_http() {
    let holder = "0x28C6c06298d514Db089934071355E5743bf21d60";
    let token = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    let mut provider = RpcMockBuilder::new().await;
    provider.mock_balance_of(holder, 1_500_000_000_000_000_000);

    let pool = pool_over(&[&provider], lenient_breaker(), CacheTtls::default());

    assert_eq!(pool.get_token_balance(token, holder).await.unwrap(), 1_500_000_000_000_000_000);
    assert_eq!(pool.get_nft_balance(token, holder).await.unwrap(), 1_500_000_000_000_000_000);
}

#[tokio::test]
async fn test_malformed_holder_leaves_circuits_closed() {
    let token = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    let mut provider = RpcMockBuilder::new().await;
    provider.mock_block_number_expecting(8, Some(1));

    let breaker = CircuitBreakerConfig {
        volume_threshold: 2,
        error_threshold_percentage: 50,
        ..CircuitBreakerConfig::default()
    };
    let pool = pool_over(&[&provider], breaker, CacheTtls::default());

    for _ in 0..5 {
        let err = pool.get_token_balance(token, "bob").await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidInput(_)), "got {err:?}");
    }

    let metrics = pool.metrics().provider("provider-0");
    assert_eq!(metrics.requests_total(), 0);
    assert_eq!(metrics.failure_total(), 0);
    assert_eq!(pool.circuit_states()[0].1, CircuitState::Closed);
    assert_eq!(pool.get_block_number().await.unwrap(), 8);
    provider.assert_all().await;
}

#[tokio::test]
async fn test_concurrent_reads_share_one_pool() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_server_error();
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_block_number(500);

    let pool = pool_over(&[&primary, &secondary], lenient_breaker(), CacheTtls::default());

    let results = futures::future::join_all((0..16).map(|_| pool.get_block_number())).await;
    assert!(results.iter().all(|r| matches!(r, Ok(500))));

    let metrics = pool.metrics();
    assert_eq!(metrics.provider("provider-0").failure_total(), 16);
    assert_eq!(metrics.provider("provider-1").success_total(), 16);
}
