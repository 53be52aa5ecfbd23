//! Periodic expiry sweep for the fallback cache.
//!
//! Lazy expiry on read is not enough for keys written once and never read again (for
//! example balance lookups for one-off addresses). The sweeper removes those proactively.
//!
//! The task holds only a `Weak` reference, so it ends on its own once the cache is dropped,
//! and exits immediately when the shutdown broadcast fires.

use super::FallbackCache;
use std::sync::{Arc, Weak};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tracing::{debug, info, trace};

impl<V: Clone + Send + Sync + 'static> FallbackCache<V> {
    /// Spawns the expiry sweeper on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(run_sweeper(Arc::downgrade(self), interval, shutdown_rx))
    }
}

pub(crate) async fn run_sweeper<V: Clone + Send + Sync + 'static>(
    cache: Weak<FallbackCache<V>>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can have expired yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!("cache sweeper received shutdown signal");
                break;
            }

            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    debug!("cache dropped, sweeper exiting");
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "swept expired cache entries");
                } else {
                    trace!(remaining = cache.len(), "cache sweep found nothing to remove");
                }
            }
        }
    }

    info!("cache sweeper shutdown complete");
}
