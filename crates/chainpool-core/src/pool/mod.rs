//! The pool facade: typed chain reads with failover, circuit breaking and fallback caching.
//!
//! [`RpcPool`] wires the provider registry, one [`ProviderEndpoint`] per provider, the
//! fallback cache and the metrics collector together. Each typed read is a cache key shape,
//! a TTL and a remote call handed to the [`FailoverExecutor`]; adding another read needs no
//! new failover logic.

pub mod builder;
pub mod executor;

pub use builder::{BuilderError, RpcPoolBuilder};
pub use executor::{CachedValue, FailoverExecutor};

use crate::{
    cache::CacheStats,
    config::AppConfig,
    metrics::{MetricsCollector, MetricsSnapshot},
    upstream::{
        circuit_breaker::CircuitState,
        endpoint::ProviderEndpoint,
        errors::{PoolError, UpstreamError},
        provider::{Provider, ProviderRegistry},
        transport::{address_hex, ProviderClient},
    },
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{info, warn};

/// Cache key of [`RpcPool::get_block_number`].
pub const BLOCK_NUMBER_KEY: &str = "blockNumber";

/// Cache key of [`RpcPool::get_token_balance`]. Addresses are lowercased so checksummed and
/// plain spellings share an entry.
#[must_use]
pub fn balance_cache_key(token: &str, holder: &str) -> String {
    format!("balance:{}:{}", token.to_ascii_lowercase(), holder.to_ascii_lowercase())
}

/// Cache key of [`RpcPool::get_nft_balance`].
#[must_use]
pub fn nft_cache_key(collection: &str, holder: &str) -> String {
    format!("nft:{}:{}", collection.to_ascii_lowercase(), holder.to_ascii_lowercase())
}

/// Rejects anything that is not a `0x`-prefixed 20-byte address before a provider sees it.
fn check_address(role: &str, value: &str) -> Result<(), PoolError> {
    match address_hex(value) {
        Some(_) => Ok(()),
        None => {
            Err(PoolError::InvalidInput(format!("{role} is not a 20-byte hex address: {value}")))
        }
    }
}

/// Fallback cache TTL per typed read, matched to how fast the data changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub balance: Duration,
    pub nft: Duration,
    pub block_number: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            balance: Duration::from_secs(60),
            nft: Duration::from_secs(60),
            block_number: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStatus {
    pub provider: String,
    pub priority: u32,
    pub state: CircuitState,
}

/// Serializable health summary of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    /// `true` while at least one circuit is not open.
    pub healthy: bool,
    pub available_providers: usize,
    pub total_providers: usize,
    pub circuits: Vec<CircuitStatus>,
}

/// Multi-provider RPC pool.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and calls with different keys
/// or against different providers never contend with each other.
pub struct RpcPool {
    registry: ProviderRegistry,
    executor: FailoverExecutor,
    ttls: CacheTtls,
    shutdown_tx: broadcast::Sender<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RpcPool {
    #[must_use]
    pub fn builder() -> RpcPoolBuilder {
        RpcPoolBuilder::new()
    }

    /// Builds a pool over the HTTP transport from application configuration.
    ///
    /// An empty provider list falls back to [`Provider::defaults`].
    ///
    /// # Errors
    ///
    /// See [`RpcPoolBuilder::build`].
    pub fn from_config(config: &AppConfig) -> Result<Self, BuilderError> {
        let mut builder = RpcPoolBuilder::new()
            .circuit_breaker(config.circuit_breaker)
            .retry_count(config.transport.retry_count)
            .cache_sweep_interval(config.cache.sweep_interval())
            .ttls(config.cache.ttls())
            .failover_deadline(config.pool.failover_deadline());

        if !config.providers.is_empty() {
            builder = builder.providers(config.providers.clone());
        }

        builder.build()
    }

    pub(crate) fn from_parts(
        registry: ProviderRegistry,
        executor: FailoverExecutor,
        ttls: CacheTtls,
        shutdown_tx: broadcast::Sender<()>,
        sweeper: Option<JoinHandle<()>>,
    ) -> Self {
        Self { registry, executor, ttls, shutdown_tx, sweeper: Mutex::new(sweeper) }
    }

    /// ERC-20 balance of `holder` on `token`, in the token's smallest unit.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidInput`] if either address is malformed, without touching
    /// any provider or breaker, and [`PoolError::AllProvidersFailed`] if no provider answered
    /// and nothing is cached.
    pub async fn get_token_balance(&self, token: &str, holder: &str) -> Result<u128, PoolError> {
        check_address("token", token)?;
        check_address("holder", holder)?;
        self.executor
            .execute_with_failover(
                &balance_cache_key(token, holder),
                self.ttls.balance,
                |client: Arc<dyn ProviderClient>| async move {
                    client.token_balance(token, holder).await
                },
            )
            .await
    }

    /// Number of tokens of the ERC-721 `collection` owned by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidInput`] if either address is malformed and
    /// [`PoolError::AllProvidersFailed`] if no provider answered and nothing is cached.
    pub async fn get_nft_balance(&self, collection: &str, holder: &str) -> Result<u64, PoolError> {
        check_address("collection", collection)?;
        check_address("holder", holder)?;
        self.executor
            .execute_with_failover(
                &nft_cache_key(collection, holder),
                self.ttls.nft,
                |client: Arc<dyn ProviderClient>| async move {
                    client.nft_balance(collection, holder).await
                },
            )
            .await
    }

    /// Current block height.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AllProvidersFailed`] if no provider answered and nothing is cached.
    pub async fn get_block_number(&self) -> Result<u64, PoolError> {
        self.executor
            .execute_with_failover(
                BLOCK_NUMBER_KEY,
                self.ttls.block_number,
                |client: Arc<dyn ProviderClient>| async move { client.block_number().await },
            )
            .await
    }

    /// Runs an arbitrary read with failover and fallback caching.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AllProvidersFailed`] if no provider answered and nothing is cached
    /// under `cache_key`.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        cache_key: &str,
        ttl: Duration,
        operation: F,
    ) -> Result<T, PoolError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<dyn ProviderClient>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.executor.execute_with_failover(cache_key, ttl, operation).await
    }

    /// Providers in failover order.
    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        self.registry.as_slice()
    }

    #[must_use]
    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    /// Circuit state per provider, in failover order.
    #[must_use]
    pub fn circuit_states(&self) -> Vec<(Arc<str>, CircuitState)> {
        self.executor
            .endpoints()
            .iter()
            .map(|endpoint| (Arc::clone(&endpoint.provider().name), endpoint.circuit_state()))
            .collect()
    }

    /// `true` while at least one provider's circuit is not open.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.available_provider_count() > 0
    }

    /// Number of providers whose circuit is not open.
    #[must_use]
    pub fn available_provider_count(&self) -> usize {
        self.executor
            .endpoints()
            .iter()
            .filter(|endpoint| endpoint.circuit_state() != CircuitState::Open)
            .count()
    }

    /// Forces a provider's circuit open.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownProvider`] if no provider has this name.
    pub fn trip_circuit(&self, provider: &str) -> Result<(), PoolError> {
        self.endpoint(provider)?.circuit_breaker().trip();
        Ok(())
    }

    /// Forces a provider's circuit closed and clears its rolling window.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownProvider`] if no provider has this name.
    pub fn reset_circuit(&self, provider: &str) -> Result<(), PoolError> {
        self.endpoint(provider)?.circuit_breaker().reset();
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.executor.cache().clear();
        info!("fallback cache cleared");
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.executor.cache().stats()
    }

    #[must_use]
    pub fn health(&self) -> PoolHealth {
        let circuits: Vec<CircuitStatus> = self
            .executor
            .endpoints()
            .iter()
            .map(|endpoint| CircuitStatus {
                provider: endpoint.name().to_string(),
                priority: endpoint.provider().priority,
                state: endpoint.circuit_state(),
            })
            .collect();
        let available_providers =
            circuits.iter().filter(|c| c.state != CircuitState::Open).count();

        PoolHealth {
            healthy: available_providers > 0,
            available_providers,
            total_providers: circuits.len(),
            circuits,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.executor.metrics()
    }

    /// Prometheus text exposition of the pool's metrics.
    #[must_use]
    pub fn prometheus_metrics(&self) -> String {
        self.refresh_circuit_states();
        self.executor.metrics().render_prometheus()
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.refresh_circuit_states();
        self.executor.metrics().snapshot()
    }

    /// Reads every breaker so an elapsed reset timeout reaches the state gauge before export.
    fn refresh_circuit_states(&self) {
        for endpoint in self.executor.endpoints().iter() {
            endpoint.circuit_breaker().state();
        }
    }

    /// Zeroes all metrics. Test and debugging use only.
    pub fn reset_metrics(&self) {
        self.executor.metrics().reset();
    }

    /// Stops the cache sweeper and waits for it to exit.
    pub async fn shutdown(&self) {
        // No receivers left means the sweeper already exited.
        let _ = self.shutdown_tx.send(());

        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "cache sweeper task failed");
            }
        }
        info!("rpc pool shut down");
    }

    fn endpoint(&self, name: &str) -> Result<&ProviderEndpoint, PoolError> {
        self.registry
            .index_of(name)
            .and_then(|index| self.executor.endpoints().get(index))
            .ok_or_else(|| PoolError::UnknownProvider(name.to_string()))
    }
}

impl Drop for RpcPool {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl std::fmt::Debug for RpcPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPool")
            .field("providers", &self.registry)
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}
