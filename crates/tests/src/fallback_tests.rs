//! Serving the last good result when every provider is down.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::mock_infrastructure::{pool_over, RpcMockBuilder};
use chainpool_core::{pool::CacheTtls, upstream::CircuitBreakerConfig, PoolError};
use std::time::Duration;

const TOKEN: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
const HOLDER: &str = "0x28C6c06298d514Db089934071355E5743bf21d60";

fn breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig { volume_threshold: 100, ..CircuitBreakerConfig::default() }
}

#[tokio::test]
async fn test_cached_value_served_when_all_circuits_open() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_block_number_expecting(42, Some(1));

    let pool = pool_over(&[&primary], breaker(), CacheTtls::default());
    assert_eq!(pool.get_block_number().await.unwrap(), 42);

    pool.trip_circuit("provider-0").unwrap();
    assert!(!pool.is_healthy());

    assert_eq!(pool.get_block_number().await.unwrap(), 42);
    primary.assert_all().await;
    assert_eq!(pool.metrics().cache_hits(), 1);
    assert_eq!(pool.metrics().cache_misses(), 0);
}

#[tokio::test]
async fn test_large_balance_survives_fallback() {
    let balance = u128::MAX - 7;
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_balance_of(HOLDER, balance);

    let pool = pool_over(&[&primary], breaker(), CacheTtls::default());
    assert_eq!(pool.get_token_balance(TOKEN, HOLDER).await.unwrap(), balance);

    pool.trip_circuit("provider-0").unwrap();

    // Cache keys are case-insensitive in the addresses.
    let lower_token = TOKEN.to_ascii_lowercase();
    let lower_holder = HOLDER.to_ascii_lowercase();
    assert_eq!(pool.get_token_balance(&lower_token, &lower_holder).await.unwrap(), balance);
}

#[tokio::test]
async fn test_failure_without_cache_reports_last_error() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_server_error();
    let mut secondary = RpcMockBuilder::new().await;
    secondary.mock_rpc_error("eth_blockNumber", -32603, "internal error");

    let pool = pool_over(&[&primary, &secondary], breaker(), CacheTtls::default());

    match pool.get_block_number().await {
        Err(PoolError::AllProvidersFailed { cache_key, last_error }) => {
            assert_eq!(cache_key, "blockNumber");
            let last_error = last_error.expect("a provider was attempted");
            assert!(last_error.starts_with("provider-1"), "got {last_error}");
            assert!(last_error.contains("internal error"), "got {last_error}");
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
    assert_eq!(pool.metrics().cache_misses(), 1);
}

#[tokio::test]
async fn test_expired_entry_is_not_served() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_block_number(10);

    let ttls = CacheTtls { block_number: Duration::from_millis(50), ..CacheTtls::default() };
    let pool = pool_over(&[&primary], breaker(), ttls);
    assert_eq!(pool.get_block_number().await.unwrap(), 10);

    pool.trip_circuit("provider-0").unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let err = pool.get_block_number().await.unwrap_err();
    assert_eq!(err.cache_key(), Some("blockNumber"));
    assert_eq!(pool.cache_stats().size, 0);
}

#[tokio::test]
async fn test_recovery_after_reset_refreshes_cache() {
    let mut primary = RpcMockBuilder::new().await;
    primary.mock_block_number_expecting(11, Some(2));

    let pool = pool_over(&[&primary], breaker(), CacheTtls::default());
    assert_eq!(pool.get_block_number().await.unwrap(), 11);

    pool.trip_circuit("provider-0").unwrap();
    pool.clear_cache();
    assert!(pool.get_block_number().await.is_err());

    pool.reset_circuit("provider-0").unwrap();
    assert_eq!(pool.get_block_number().await.unwrap(), 11);
    assert_eq!(pool.cache_stats().size, 1);

    primary.assert_all().await;
    pool.shutdown().await;
}
