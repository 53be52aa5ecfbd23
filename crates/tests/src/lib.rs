//! Integration tests for chainpool.
//!
//! Every test here drives the pool through the real HTTP transport against `mockito`
//! JSON-RPC servers:
//!
//! - `http_transport_tests`: request encoding and error classification of the `reqwest` client
//! - `failover_tests`: priority ordering, provider failures and circuit breaker skips
//! - `fallback_tests`: serving the last good result when every provider is down
//! - `mock_infrastructure`: reusable JSON-RPC mock server builder
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod failover_tests;

#[cfg(test)]
mod fallback_tests;

#[cfg(test)]
mod http_transport_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
