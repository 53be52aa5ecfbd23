//! Pool hot-path benchmarks using Criterion.
//!
//! Covers the operations every call touches:
//! - Fallback cache `set`/`get` (every success writes, every total failure reads)
//! - Latency histogram observation
//! - Prometheus rendering with a realistic provider count
//! - A full failover call against in-memory providers

#![allow(clippy::expect_used)] // Acceptable in benchmark code

use async_trait::async_trait;
use chainpool_core::{
    cache::FallbackCache,
    metrics::{LatencyHistogram, MetricsCollector},
    upstream::{ClientOptions, Provider, ProviderClient, TransportFactory, UpstreamError},
    RpcPool,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use std::{hint::black_box, sync::Arc, time::Duration};

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("fallback_cache");

    for size in &[100usize, 10_000] {
        let cache = FallbackCache::new();
        for i in 0..*size {
            cache.set(format!("balance:0xtoken:{i}"), i as u64, Duration::from_secs(60));
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("get_hit", size), size, |b, &size| {
            let key = format!("balance:0xtoken:{}", size / 2);
            b.iter(|| black_box(cache.get(black_box(&key))));
        });
        group.bench_with_input(BenchmarkId::new("get_miss", size), size, |b, _| {
            b.iter(|| black_box(cache.get(black_box("balance:0xtoken:absent"))));
        });
        group.bench_with_input(BenchmarkId::new("set_overwrite", size), size, |b, _| {
            b.iter(|| cache.set("blockNumber", black_box(42u64), Duration::from_secs(5)));
        });
    }

    group.finish();
}

fn bench_histogram(c: &mut Criterion) {
    let histogram = LatencyHistogram::new();
    let mut latency = 0u64;

    c.bench_function("histogram_observe", |b| {
        b.iter(|| {
            latency = (latency + 37) % 12_000;
            histogram.observe(black_box(latency));
        });
    });
}

fn bench_render(c: &mut Criterion) {
    let collector = MetricsCollector::new();
    for name in ["llamarpc", "publicnode", "cloudflare", "alchemy", "infura"] {
        let provider = collector.provider(name);
        for latency in [5, 40, 120, 800, 3_000] {
            provider.record_success(latency);
        }
        provider.record_failure(true);
    }

    c.bench_function("render_prometheus_5_providers", |b| {
        b.iter(|| black_box(collector.render_prometheus()));
    });
}

struct StaticClient {
    healthy: bool,
}

#[async_trait]
impl ProviderClient for StaticClient {
    async fn request(&self, _method: &str, _params: Value) -> Result<Value, UpstreamError> {
        if self.healthy {
            Ok(json!("0x1234"))
        } else {
            Err(UpstreamError::ConnectionFailed("down".to_string()))
        }
    }
}

struct StaticTransport;

impl TransportFactory for StaticTransport {
    fn create(
        &self,
        provider: &Provider,
        _options: &ClientOptions,
    ) -> Result<Arc<dyn ProviderClient>, UpstreamError> {
        Ok(Arc::new(StaticClient { healthy: provider.name.as_ref() != "primary" }))
    }
}

fn bench_failover(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");
    let pool = runtime.block_on(async {
        RpcPool::builder()
            .providers(vec![
                Provider::new("primary", "http://primary.invalid", 1),
                Provider::new("secondary", "http://secondary.invalid", 2),
            ])
            .transport_factory(Arc::new(StaticTransport))
            .build()
            .expect("failed to build pool")
    });
    // Keep the failing primary closed so every iteration walks both providers.
    let reset_every = 4;
    let mut calls = 0u64;

    c.bench_function("failover_second_provider", |b| {
        b.to_async(&runtime).iter(|| {
            calls += 1;
            if calls % reset_every == 0 {
                pool.reset_circuit("primary").expect("provider exists");
            }
            let pool = &pool;
            async move { black_box(pool.get_block_number().await.expect("secondary answers")) }
        });
    });
}

criterion_group!(benches, bench_cache, bench_histogram, bench_render, bench_failover);
criterion_main!(benches);
