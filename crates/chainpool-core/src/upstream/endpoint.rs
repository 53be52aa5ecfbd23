use std::{future::Future, sync::Arc};
use tokio::time::Instant;

use crate::metrics::ProviderMetrics;

use super::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, StateTransition},
    errors::UpstreamError,
    provider::Provider,
    transport::ProviderClient,
};

/// One provider with its circuit breaker, client and metrics handle.
///
/// Every call made through [`ProviderEndpoint::call`] is gated by the breaker, bounded by
/// the breaker timeout and counted in the provider's metrics. Breaker transitions are fed to
/// the metrics handle through the breaker's listener.
pub struct ProviderEndpoint {
    provider: Provider,
    breaker: CircuitBreaker,
    client: Arc<dyn ProviderClient>,
    metrics: Arc<ProviderMetrics>,
}

impl ProviderEndpoint {
    #[must_use]
    pub fn new(
        provider: Provider,
        config: CircuitBreakerConfig,
        client: Arc<dyn ProviderClient>,
        metrics: Arc<ProviderMetrics>,
    ) -> Self {
        let listener_metrics = Arc::clone(&metrics);
        let breaker = CircuitBreaker::new(Arc::clone(&provider.name), config)
            .with_listener(Arc::new(move |transition: StateTransition| {
                listener_metrics.record_state_change(transition.to);
            }));

        Self { provider, breaker, client, metrics }
    }

    #[must_use]
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.provider.name
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn ProviderClient> {
        &self.client
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Runs `operation` against this provider's client through the circuit breaker.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::CircuitOpen`] if the breaker rejected the call (not an attempt)
    /// - [`UpstreamError::Timeout`] if the call exceeded the breaker timeout
    /// - the operation's own error otherwise
    pub async fn call<T, F, Fut>(&self, operation: &F) -> Result<T, UpstreamError>
    where
        F: Fn(Arc<dyn ProviderClient>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut admitted = false;
        let start = Instant::now();
        let result = self
            .breaker
            .execute(|| {
                admitted = true;
                operation(Arc::clone(&self.client))
            })
            .await;

        match &result {
            _ if !admitted => self.metrics.record_rejection(),
            Ok(_) => {
                #[allow(clippy::cast_possible_truncation)]
                let latency_ms = start.elapsed().as_millis() as u64;
                self.metrics.record_success(latency_ms);
            }
            Err(e) => self.metrics.record_failure(e.is_timeout()),
        }

        result
    }
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("provider", &self.provider)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
