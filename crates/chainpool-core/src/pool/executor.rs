use std::{any::Any, future::Future, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

use crate::{
    cache::FallbackCache,
    metrics::MetricsCollector,
    upstream::{
        endpoint::ProviderEndpoint,
        errors::{PoolError, UpstreamError},
        transport::ProviderClient,
    },
};

/// Type-erased value stored in the fallback cache.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Priority-ordered failover with fallback to the last known good result.
///
/// Providers are tried one at a time in registry order. The first success is cached and
/// returned. Open circuits are skipped, and any other failure moves on to the next provider
/// immediately. When every provider has been skipped or has failed, the fallback cache is
/// consulted and only then does the call fail.
pub struct FailoverExecutor {
    endpoints: Arc<[ProviderEndpoint]>,
    cache: Arc<FallbackCache<CachedValue>>,
    metrics: Arc<MetricsCollector>,
    deadline: Option<Duration>,
}

impl FailoverExecutor {
    #[must_use]
    pub fn new(
        endpoints: Arc<[ProviderEndpoint]>,
        cache: Arc<FallbackCache<CachedValue>>,
        metrics: Arc<MetricsCollector>,
        deadline: Option<Duration>,
    ) -> Self {
        Self { endpoints, cache, metrics, deadline }
    }

    #[must_use]
    pub fn endpoints(&self) -> &[ProviderEndpoint] {
        &self.endpoints
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<FallbackCache<CachedValue>> {
        &self.cache
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Runs `operation` against the providers in priority order.
    ///
    /// On success the value is stored under `cache_key` for `ttl`. If no provider succeeds,
    /// an unexpired cached value for `cache_key` is returned instead. A cached value of a
    /// different type than `T` is treated as absent.
    ///
    /// When a failover deadline is configured, the whole provider loop is bounded by it and
    /// the in-flight provider call is cancelled on expiry before the cache is consulted.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AllProvidersFailed`] if every provider was skipped or failed
    /// and the cache had no usable entry for `cache_key`.
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
        let attempt = self.try_providers(cache_key, &operation);
        let outcome = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        cache_key = %cache_key,
                        deadline = ?deadline,
                        "failover deadline exceeded"
                    );
                    Err(Some(format!("failover deadline of {}ms exceeded", deadline.as_millis())))
                }
            },
            None => attempt.await,
        };

        match outcome {
            Ok(value) => {
                let cached: CachedValue = Arc::new(value.clone());
                self.cache.set(cache_key, cached, ttl);
                Ok(value)
            }
            Err(last_error) => self.serve_from_cache(cache_key, last_error),
        }
    }

    /// Walks the providers. Returns the description of the last failure when none succeeds.
    async fn try_providers<T, F, Fut>(&self, cache_key: &str, operation: &F) -> Result<T, Option<String>>
    where
        F: Fn(Arc<dyn ProviderClient>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut last_error = None;

        for endpoint in self.endpoints.iter() {
            match endpoint.call(operation).await {
                Ok(value) => {
                    debug!(provider = %endpoint.name(), cache_key = %cache_key, "provider call succeeded");
                    return Ok(value);
                }
                Err(UpstreamError::CircuitOpen) => {
                    debug!(provider = %endpoint.name(), cache_key = %cache_key, "skipping provider, circuit open");
                    if last_error.is_none() {
                        last_error = Some(format!("{}: {}", endpoint.name(), UpstreamError::CircuitOpen));
                    }
                }
                Err(e) => {
                    warn!(
                        provider = %endpoint.name(),
                        cache_key = %cache_key,
                        error = %e,
                        error_type = e.as_metric_str(),
                        "provider call failed, trying next provider"
                    );
                    last_error = Some(format!("{}: {e}", endpoint.name()));
                }
            }
        }

        Err(last_error)
    }

    fn serve_from_cache<T>(&self, cache_key: &str, last_error: Option<String>) -> Result<T, PoolError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cached = self
            .cache
            .get(cache_key)
            .and_then(|value| value.downcast_ref::<T>().cloned());

        if let Some(value) = cached {
            self.metrics.record_cache_hit();
            warn!(cache_key = %cache_key, "all providers failed, serving cached value");
            return Ok(value);
        }

        self.metrics.record_cache_miss();
        error!(
            cache_key = %cache_key,
            last_error = last_error.as_deref().unwrap_or("no provider attempted"),
            "all providers failed and no cached value available"
        );
        Err(PoolError::AllProvidersFailed { cache_key: cache_key.to_string(), last_error })
    }
}

impl std::fmt::Debug for FailoverExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverExecutor")
            .field("endpoints", &self.endpoints)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
