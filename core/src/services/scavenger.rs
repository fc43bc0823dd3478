use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::discovery::DiscoveryRegistry;

/// Background cleanup of the discovery registry and the cache.
///
/// Every `sweep_interval` stale heartbeats and expired cache records are
/// removed. When reclamation is enabled, registry storage is also shrunk every
/// `reclaim_interval`.
pub struct ResourceScavenger {
    discovery: Arc<DiscoveryRegistry>,
    cache: Arc<CacheStore>,
    sweep_interval: Duration,
    reclaim_interval: Option<Duration>,
}

impl ResourceScavenger {
    pub fn new(
        discovery: Arc<DiscoveryRegistry>,
        cache: Arc<CacheStore>,
        sweep_interval: Duration,
        reclaim_interval: Option<Duration>,
    ) -> Self {
        Self {
            discovery,
            cache,
            sweep_interval,
            reclaim_interval,
        }
    }

    /// One sweep pass; returns (heartbeats removed, cache records removed).
    pub fn sweep_once(&self) -> (usize, usize) {
        let heartbeats = self.discovery.sweep();
        let cached = match self.cache.sweep_expired() {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Cache sweep failed");
                0
            }
        };
        (heartbeats, cached)
    }

    pub fn reclaim(&self) {
        self.discovery.shrink();
        debug!("Registry storage reclaimed");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut next_reclaim = self.reclaim_interval.map(|every| Instant::now() + every);
            info!(
                interval_ms = self.sweep_interval.as_millis() as u64,
                reclaim = self.reclaim_interval.is_some(),
                "Resource scavenger started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_once();
                        if let (Some(due), Some(every)) = (next_reclaim, self.reclaim_interval) {
                            if Instant::now() >= due {
                                self.reclaim();
                                next_reclaim = Some(Instant::now() + every);
                            }
                        }
                    }
                }
            }
            debug!("Resource scavenger stopped");
        })
    }
}
