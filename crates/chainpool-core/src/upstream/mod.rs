//! Upstream RPC provider management.
//!
//! This module handles everything scoped to a single provider:
//! - The immutable, priority-ordered [`ProviderRegistry`]
//! - The per-provider [`CircuitBreaker`] with its rolling window
//! - The [`ProviderClient`] / [`TransportFactory`] seam and its HTTP implementation
//! - [`ProviderEndpoint`], which ties a provider to its breaker, client and metrics
//!
//! # Circuit Breaker States
//!
//! ```text
//!            volume >= threshold and
//!            failure % >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                               │  ▲
//!     │ trial succeeds                │  │ trial fails
//!     │                  reset timeout│  │
//!     └─────────────── HalfOpen ◄─────┘  │
//!                          └─────────────┘
//! ```
//!
//! While `HalfOpen`, exactly one trial call is in flight; concurrent callers are rejected as
//! if the circuit were open.

pub mod circuit_breaker;
pub mod endpoint;
pub mod errors;
pub mod http_client;
pub mod provider;
pub mod transport;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, StateChangeListener,
    StateTransition, WindowCounts,
};
pub use endpoint::ProviderEndpoint;
pub use errors::{PoolError, UpstreamError};
pub use http_client::{HttpClient, HttpTransportFactory};
pub use provider::{Provider, ProviderRegistry, RegistryError};
pub use transport::{address_hex, ClientOptions, ProviderClient, TransportFactory};
