//! # Chainpool Core
//!
//! Resilience layer for reading on-chain state from several independent JSON-RPC providers.
//!
//! - **[`upstream`]**: provider registry, per-provider circuit breakers, and the transport
//!   client seam with its `reqwest` implementation.
//!
//! - **[`pool`]**: the [`RpcPool`] facade and the failover executor behind it.
//!
//! - **[`cache`]**: TTL fallback cache holding the last good result per call.
//!
//! - **[`metrics`]**: per-provider counters and latency histograms, exported as Prometheus
//!   text and as a JSON snapshot.
//!
//! - **[`config`]**: layered application configuration.
//!
//! ## Request Flow
//!
//! ```text
//! RpcPool::get_block_number()
//!       │
//!       ▼
//! ┌──────────────────┐
//! │ FailoverExecutor │  providers in ascending priority, one at a time
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Circuit breaker │ ─── Open ──► skip, next provider
//! └────────┬────────┘
//!          │ Closed / HalfOpen trial
//!          ▼
//! ┌─────────────────┐
//! │ ProviderClient  │ ─── Error / Timeout ──► next provider
//! └────────┬────────┘
//!          │ Ok
//!          ▼
//!   Cache result, return
//!
//! All providers skipped or failed
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Fallback cache  │ ─── Hit ──► cached value
//! └────────┬────────┘
//!          │ Miss
//!          ▼
//!   PoolError::AllProvidersFailed
//! ```

pub mod cache;
pub mod config;
pub mod metrics;
pub mod pool;
pub mod upstream;

pub use config::AppConfig;
pub use pool::{PoolHealth, RpcPool, RpcPoolBuilder};
pub use upstream::{CircuitState, PoolError, Provider, UpstreamError};
