//! Fallback cache for last-known-good results.
//!
//! The pool writes every successful result here under its logical operation key
//! (`balance:{token}:{holder}`, `blockNumber`, ...). When every provider fails, the pool
//! serves the cached value instead of an error, as long as it has not expired.
//!
//! - **Lazy expiry**: reads treat expired entries as absent and drop them.
//! - **Background sweep**: [`FallbackCache::start_sweeper`] periodically removes expired
//!   entries that are never read again.

pub mod background;
pub mod fallback;

pub use fallback::{CacheEntry, CacheStats, FallbackCache};
