//! # Metrics Architecture
//!
//! Dual-path metrics for the provider pool.
//!
//! ## Owned Path
//!
//! Every provider gets a [`ProviderMetrics`] of plain atomics (requests, outcomes, timeouts,
//! breaker rejections, state changes, latency histogram). The pool holds an `Arc` to each one
//! by provider index, so recording never looks anything up by name. These counters back
//! [`MetricsCollector::snapshot`] and the accessors the pool's tests assert on.
//!
//! ## Exporter Path
//!
//! Each collector owns a `PrometheusRecorder`. Facade handles (`metrics::Counter`, `Gauge`,
//! `Histogram`) are registered against it once per provider, and every recording is sent to
//! them alongside the atomics. [`MetricsCollector::render_prometheus`] renders from the
//! recorder's `PrometheusHandle`. The recorder is never installed globally, so two pools in
//! one process keep separate families.
//!
//! ## Families
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `rpc_requests_total` | counter | `provider` |
//! | `rpc_requests_success_total` | counter | `provider` |
//! | `rpc_requests_failed_total` | counter | `provider` |
//! | `rpc_timeouts_total` | counter | `provider` |
//! | `rpc_rejections_total` | counter | `provider` |
//! | `rpc_circuit_breaker_state` | gauge (0 closed, 1 half-open, 2 open) | `provider` |
//! | `rpc_circuit_state_changes_total` | counter | `provider` |
//! | `rpc_request_duration_ms` | histogram | `provider`, `le` |
//! | `rpc_cache_hits_total` | counter | |
//! | `rpc_cache_misses_total` | counter | |

pub mod histogram;

pub use histogram::{BucketCount, HistogramSnapshot, LatencyHistogram, LATENCY_BUCKETS_MS};

use crate::upstream::circuit_breaker::CircuitState;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Counter,
    Gauge, Histogram,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

/// Content type of [`MetricsCollector::render_prometheus`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

const REQUEST_DURATION: &str = "rpc_request_duration_ms";

fn build_recorder() -> PrometheusRecorder {
    #[allow(clippy::cast_precision_loss)]
    let bounds: Vec<f64> = LATENCY_BUCKETS_MS.iter().map(|&bound| bound as f64).collect();

    match PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), &bounds)
    {
        Ok(builder) => builder.build_recorder(),
        Err(e) => {
            tracing::error!(error = %e, "invalid latency buckets, falling back to summaries");
            PrometheusBuilder::new().build_recorder()
        }
    }
}

fn describe_families() {
    describe_counter!("rpc_requests_total", "Provider call attempts.");
    describe_counter!("rpc_requests_success_total", "Successful provider calls.");
    describe_counter!("rpc_requests_failed_total", "Failed provider calls, timeouts included.");
    describe_counter!("rpc_timeouts_total", "Provider calls that exceeded the breaker timeout.");
    describe_counter!("rpc_rejections_total", "Calls rejected by an open circuit breaker.");
    describe_gauge!(
        "rpc_circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=half-open, 2=open)."
    );
    describe_counter!("rpc_circuit_state_changes_total", "Circuit breaker state transitions.");
    describe_histogram!(REQUEST_DURATION, "Successful provider call latency in milliseconds.");
    describe_counter!("rpc_cache_hits_total", "Fallback cache lookups that served a value.");
    describe_counter!("rpc_cache_misses_total", "Fallback cache lookups that found nothing.");
}

/// Recorder plus the pool-wide handles registered on it.
struct Exporter {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    cache_hits: Counter,
    cache_misses: Counter,
}

impl Exporter {
    fn new() -> Self {
        let recorder = build_recorder();
        let handle = recorder.handle();
        let (cache_hits, cache_misses) = metrics::with_local_recorder(&recorder, || {
            describe_families();
            (counter!("rpc_cache_hits_total"), counter!("rpc_cache_misses_total"))
        });
        Self { recorder, handle, cache_hits, cache_misses }
    }
}

/// Facade handles of one provider, bound to the collector's recorder.
struct ProviderHandles {
    requests: Counter,
    success: Counter,
    failure: Counter,
    timeouts: Counter,
    rejections: Counter,
    state_changes: Counter,
    state: Gauge,
    latency: Histogram,
}

impl ProviderHandles {
    fn register(recorder: &PrometheusRecorder, provider: &str, state: CircuitState) -> Self {
        metrics::with_local_recorder(recorder, || {
            let handles = Self {
                requests: counter!("rpc_requests_total", "provider" => provider.to_string()),
                success: counter!("rpc_requests_success_total", "provider" => provider.to_string()),
                failure: counter!("rpc_requests_failed_total", "provider" => provider.to_string()),
                timeouts: counter!("rpc_timeouts_total", "provider" => provider.to_string()),
                rejections: counter!("rpc_rejections_total", "provider" => provider.to_string()),
                state_changes: counter!(
                    "rpc_circuit_state_changes_total",
                    "provider" => provider.to_string()
                ),
                state: gauge!("rpc_circuit_breaker_state", "provider" => provider.to_string()),
                latency: histogram!(REQUEST_DURATION, "provider" => provider.to_string()),
            };
            handles.state.set(f64::from(state.as_gauge_value()));
            handles
        })
    }
}

/// Counters and latency for one provider.
pub struct ProviderMetrics {
    name: Arc<str>,
    requests: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    timeouts: AtomicU64,
    rejections: AtomicU64,
    state_changes: AtomicU64,
    state: AtomicU8,
    latency: LatencyHistogram,
    handles: RwLock<ProviderHandles>,
}

impl fmt::Debug for ProviderMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMetrics")
            .field("name", &self.name)
            .field("requests", &self.requests_total())
            .field("state", &self.circuit_state())
            .finish_non_exhaustive()
    }
}

impl ProviderMetrics {
    fn new(name: Arc<str>, recorder: &PrometheusRecorder) -> Self {
        let handles = ProviderHandles::register(recorder, &name, CircuitState::Closed);
        Self {
            name,
            requests: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            state_changes: AtomicU64::new(0),
            state: AtomicU8::new(CircuitState::Closed.as_gauge_value()),
            latency: LatencyHistogram::new(),
            handles: RwLock::new(handles),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records a successful attempt and its latency.
    pub fn record_success(&self, latency_ms: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.success.fetch_add(1, Ordering::Relaxed);
        self.latency.observe(latency_ms);

        let handles = self.handles.read();
        handles.requests.increment(1);
        handles.success.increment(1);
        #[allow(clippy::cast_precision_loss)]
        handles.latency.record(latency_ms as f64);
    }

    /// Records a failed attempt. A timeout also counts toward `rpc_timeouts_total`.
    pub fn record_failure(&self, timed_out: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failure.fetch_add(1, Ordering::Relaxed);

        let handles = self.handles.read();
        handles.requests.increment(1);
        handles.failure.increment(1);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            handles.timeouts.increment(1);
        }
    }

    /// Records a call the circuit breaker refused without contacting the provider.
    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        self.handles.read().rejections.increment(1);
    }

    pub fn record_state_change(&self, to: CircuitState) {
        self.state_changes.fetch_add(1, Ordering::Relaxed);
        self.state.store(to.as_gauge_value(), Ordering::Relaxed);

        let handles = self.handles.read();
        handles.state_changes.increment(1);
        handles.state.set(f64::from(to.as_gauge_value()));
    }

    #[must_use]
    pub fn requests_total(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn success_total(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failure_total(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn timeouts_total(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections_total(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn state_changes_total(&self) -> u64 {
        self.state_changes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        CircuitState::from_gauge_value(self.state.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    #[must_use]
    pub fn snapshot(&self) -> ProviderSnapshot {
        let requests = self.requests_total();
        let success = self.success_total();
        #[allow(clippy::cast_precision_loss)]
        let success_rate = (requests > 0).then(|| success as f64 / requests as f64);

        ProviderSnapshot {
            provider: self.name.to_string(),
            requests_total: requests,
            success_total: success,
            failure_total: self.failure_total(),
            timeouts_total: self.timeouts_total(),
            rejections_total: self.rejections_total(),
            circuit_state: self.circuit_state(),
            circuit_state_changes_total: self.state_changes_total(),
            average_latency_ms: self.latency.average(),
            success_rate,
            latency: self.latency.snapshot(),
        }
    }

    /// Zeroes every counter and binds fresh handles on `recorder`. The state gauge keeps
    /// mirroring the live breaker.
    fn reset(&self, recorder: &PrometheusRecorder) {
        for counter in [
            &self.requests,
            &self.success,
            &self.failure,
            &self.timeouts,
            &self.rejections,
            &self.state_changes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.latency.reset();
        *self.handles.write() =
            ProviderHandles::register(recorder, &self.name, self.circuit_state());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    pub provider: String,
    pub requests_total: u64,
    pub success_total: u64,
    pub failure_total: u64,
    pub timeouts_total: u64,
    pub rejections_total: u64,
    pub circuit_state: CircuitState,
    pub circuit_state_changes_total: u64,
    pub average_latency_ms: Option<f64>,
    pub success_rate: Option<f64>,
    pub latency: HistogramSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, `None` before the first fallback lookup.
    pub hit_rate: Option<f64>,
}

/// JSON debug view of everything the collector holds.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub providers: Vec<ProviderSnapshot>,
    pub cache: CacheMetricsSnapshot,
}

/// Pool-wide metrics registry.
///
/// Providers are kept in registration order, which the pool makes its priority order, so
/// both exposition formats list them the way failover walks them.
pub struct MetricsCollector {
    exporter: RwLock<Exporter>,
    providers: RwLock<Vec<Arc<ProviderMetrics>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("providers", &self.providers.read().len())
            .field("cache_hits", &self.cache_hits())
            .field("cache_misses", &self.cache_misses())
            .finish_non_exhaustive()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            exporter: RwLock::new(Exporter::new()),
            providers: RwLock::new(Vec::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Returns the metrics handle for `name`, registering it on first use.
    pub fn provider(&self, name: &str) -> Arc<ProviderMetrics> {
        if let Some(existing) = self.providers.read().iter().find(|p| p.name() == name) {
            return Arc::clone(existing);
        }

        // Exporter before providers, the same order `reset` takes them in.
        let exporter = self.exporter.read();
        let mut providers = self.providers.write();
        // Another thread may have registered it between the two locks.
        if let Some(existing) = providers.iter().find(|p| p.name() == name) {
            return Arc::clone(existing);
        }
        let metrics = Arc::new(ProviderMetrics::new(Arc::from(name), &exporter.recorder));
        providers.push(Arc::clone(&metrics));
        metrics
    }

    /// Fallback lookup served a cached value.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.exporter.read().cache_hits.increment(1);
    }

    /// Fallback lookup found nothing usable.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.exporter.read().cache_misses.increment(1);
    }

    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let hits = self.cache_hits();
        let total = hits + self.cache_misses();
        #[allow(clippy::cast_precision_loss)]
        (total > 0).then(|| hits as f64 / total as f64)
    }

    /// Snapshot of the registered providers in registration order.
    #[must_use]
    pub fn providers(&self) -> Vec<Arc<ProviderMetrics>> {
        self.providers.read().clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            providers: self.providers.read().iter().map(|p| p.snapshot()).collect(),
            cache: CacheMetricsSnapshot {
                hits: self.cache_hits(),
                misses: self.cache_misses(),
                hit_rate: self.cache_hit_rate(),
            },
        }
    }

    /// Renders every family in the Prometheus text exposition format (version 0.0.4).
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        self.exporter.read().handle.render()
    }

    /// Zeroes all counters and histograms. Test and debugging use only.
    ///
    /// Exporter counters are monotonic, so the recorder is replaced and every provider is
    /// bound to the new one with its current circuit state.
    pub fn reset(&self) {
        let mut exporter = self.exporter.write();
        *exporter = Exporter::new();
        for provider in self.providers.read().iter() {
            provider.reset(&exporter.recorder);
        }
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}
