//! Builder pattern for constructing an `RpcPool`.

use super::{CacheTtls, RpcPool};
use crate::{
    cache::FallbackCache,
    metrics::MetricsCollector,
    pool::executor::{CachedValue, FailoverExecutor},
    upstream::{
        circuit_breaker::CircuitBreakerConfig,
        endpoint::ProviderEndpoint,
        errors::UpstreamError,
        http_client::HttpTransportFactory,
        provider::{Provider, ProviderRegistry, RegistryError},
        transport::{ClientOptions, TransportFactory},
    },
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Errors that can occur during pool construction.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("at least one provider is required")]
    NoProviders,

    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),

    #[error("invalid circuit breaker options: {0}")]
    InvalidCircuitBreaker(String),

    #[error("cache sweep interval must be greater than zero")]
    InvalidSweepInterval,

    /// The transport factory could not build a client for a provider.
    #[error("failed to create client for provider {provider}: {source}")]
    Transport {
        provider: String,
        #[source]
        source: UpstreamError,
    },
}

impl From<RegistryError> for BuilderError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::Empty => Self::NoProviders,
            RegistryError::DuplicateName(name) => Self::DuplicateProvider(name),
        }
    }
}

/// Builder for an [`RpcPool`].
///
/// Without `providers(..)` the built-in public endpoints are used; without
/// `transport_factory(..)` clients are created by an [`HttpTransportFactory`].
///
/// # Examples
///
/// ```no_run
/// # use chainpool_core::{pool::RpcPoolBuilder, upstream::Provider};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = RpcPoolBuilder::new()
///     .providers(vec![
///         Provider::new("primary", "https://rpc-a.example.com", 1),
///         Provider::new("backup", "https://rpc-b.example.com", 2),
///     ])
///     .retry_count(1)
///     .build()?;
///
/// let height = pool.get_block_number().await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcPoolBuilder {
    providers: Option<Vec<Provider>>,
    circuit_breaker: CircuitBreakerConfig,
    transport: Option<Arc<dyn TransportFactory>>,
    retry_count: u32,
    sweep_interval: Duration,
    failover_deadline: Option<Duration>,
    ttls: CacheTtls,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RpcPoolBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            transport: None,
            retry_count: 0,
            sweep_interval: Duration::from_secs(60),
            failover_deadline: None,
            ttls: CacheTtls::default(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn providers(mut self, providers: Vec<Provider>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Options shared by every provider's breaker.
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    #[must_use]
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(factory);
        self
    }

    /// Transport-level retries per provider attempt (default: 0).
    #[must_use]
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Interval of the background cache sweep (default: 60s).
    #[must_use]
    pub fn cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Bounds the whole provider loop of each call (default: unbounded).
    #[must_use]
    pub fn failover_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.failover_deadline = deadline;
        self
    }

    #[must_use]
    pub fn ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    /// Shares an existing collector instead of creating one.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the pool and, when called inside a Tokio runtime, starts the cache sweeper.
    ///
    /// # Errors
    ///
    /// Returns a [`BuilderError`] if the provider list is empty or has duplicate names, the
    /// breaker options are invalid, the sweep interval is zero, or a client cannot be created.
    pub fn build(self) -> Result<RpcPool, BuilderError> {
        self.circuit_breaker.validate().map_err(BuilderError::InvalidCircuitBreaker)?;
        if self.sweep_interval.is_zero() {
            return Err(BuilderError::InvalidSweepInterval);
        }

        let registry = ProviderRegistry::new(self.providers.unwrap_or_else(Provider::defaults))?;

        let transport: Arc<dyn TransportFactory> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransportFactory::new().map_err(|source| {
                BuilderError::Transport { provider: "*".to_string(), source }
            })?),
        };

        let options =
            ClientOptions { timeout: self.circuit_breaker.timeout(), retry_count: self.retry_count };
        let metrics = self.metrics.unwrap_or_default();

        let endpoints = registry
            .iter()
            .map(|provider| {
                let client = transport.create(provider, &options).map_err(|source| {
                    BuilderError::Transport { provider: provider.name.to_string(), source }
                })?;
                debug!(provider = %provider.name, priority = provider.priority, "provider registered");
                Ok(ProviderEndpoint::new(
                    provider.clone(),
                    self.circuit_breaker,
                    client,
                    metrics.provider(&provider.name),
                ))
            })
            .collect::<Result<Vec<_>, BuilderError>>()?;

        let cache: Arc<FallbackCache<CachedValue>> = Arc::new(FallbackCache::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        let sweeper = if tokio::runtime::Handle::try_current().is_ok() {
            Some(cache.start_sweeper(self.sweep_interval, shutdown_tx.subscribe()))
        } else {
            debug!("no tokio runtime, cache sweeper not started");
            None
        };

        info!(
            providers = registry.len(),
            order = ?registry.iter().map(|p| p.name.as_ref()).collect::<Vec<_>>(),
            failover_deadline = ?self.failover_deadline,
            "rpc pool initialized"
        );

        let executor =
            FailoverExecutor::new(Arc::from(endpoints), cache, metrics, self.failover_deadline);

        Ok(RpcPool::from_parts(registry, executor, self.ttls, shutdown_tx, sweeper))
    }
}

impl Default for RpcPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
