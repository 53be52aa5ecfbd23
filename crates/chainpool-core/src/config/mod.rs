//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and `set_default` calls
//! 2. **Config file**: TOML file named by the `CHAINPOOL_CONFIG` env var (default
//!    `config/config.toml`, optional)
//! 3. **Environment variables**: `CHAINPOOL__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP server bind address and port
//! - `providers`: upstream RPC endpoints; empty means the built-in public endpoints
//! - [`CircuitBreakerConfig`]: options shared by every provider's breaker
//! - [`TransportConfig`]: transport-level retries
//! - [`CacheConfig`]: fallback cache TTLs and sweep interval
//! - [`PoolConfig`]: failover loop deadline
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 3030
//!
//! [[providers]]
//! name = "primary"
//! url = "https://eth-mainnet.example.com"
//! priority = 1
//!
//! [circuit_breaker]
//! timeout_ms = 5000
//! error_threshold_percentage = 50
//!
//! [cache]
//! block_number_ttl_seconds = 5
//! ```

use crate::{
    pool::CacheTtls,
    upstream::{circuit_breaker::CircuitBreakerConfig, provider::Provider},
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, time::Duration};

/// HTTP server configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3030`.
    pub bind_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), bind_port: 3030 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Extra attempts per provider call on 5xx or transport errors. Defaults to `0`.
    pub retry_count: u32,
}

/// Fallback cache settings. TTLs are per typed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Interval of the background expiry sweep. Defaults to `60`.
    pub sweep_interval_seconds: u64,
    pub balance_ttl_seconds: u64,
    pub nft_ttl_seconds: u64,
    pub block_number_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 60,
            balance_ttl_seconds: 60,
            nft_ttl_seconds: 60,
            block_number_ttl_seconds: 5,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            balance: Duration::from_secs(self.balance_ttl_seconds),
            nft: Duration::from_secs(self.nft_ttl_seconds),
            block_number: Duration::from_secs(self.block_number_ttl_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on the whole provider loop of one call. Unset means each provider gets its
    /// full breaker timeout.
    pub failover_deadline_ms: Option<u64>,
}

impl PoolConfig {
    #[must_use]
    pub fn failover_deadline(&self) -> Option<Duration> {
        self.failover_deadline_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset. Defaults to `info`.
    pub level: String,
    /// `pretty` or `json`. Defaults to `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Upstream providers. Empty means [`Provider::defaults`].
    pub providers: Vec<Provider>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub transport: TransportConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `CHAINPOOL__` prefix can override any configuration
    /// value. Use `__` as a separator for nested fields (e.g.
    /// `CHAINPOOL__SERVER__BIND_PORT=8080`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("server.bind_address", "127.0.0.1")?
            .set_default("server.bind_port", 3030)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("CHAINPOOL").separator("__").try_parsing(true))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `CHAINPOOL_CONFIG` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CHAINPOOL_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Combines `server.bind_address` and `server.bind_port` into a socket address.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    /// Providers the pool will use: the configured list, or the built-in defaults.
    #[must_use]
    pub fn effective_providers(&self) -> Vec<Provider> {
        if self.providers.is_empty() {
            Provider::defaults()
        } else {
            self.providers.clone()
        }
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_ref()) {
                return Err(format!("Duplicate provider name: {}", provider.name));
            }
            match url::Url::parse(&provider.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => {
                    return Err(format!(
                        "Invalid URL for provider {}: {}",
                        provider.name, provider.url
                    ))
                }
            }
        }

        self.circuit_breaker.validate()?;

        if self.cache.sweep_interval_seconds == 0 {
            return Err("Cache sweep interval must be greater than 0".to_string());
        }

        if self.pool.failover_deadline_ms == Some(0) {
            return Err("Failover deadline must be greater than 0 when set".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
