use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::proto::HeartBeatPulse;
use crate::services::MonitorableService;
use crate::timestamp;

/// Last heartbeat pulse seen from each peer application.
///
/// A peer is alive while its most recent pulse is no older than the tolerance.
#[derive(Debug)]
pub struct DiscoveryRegistry {
    peers: DashMap<String, HeartBeatPulse>,
    tolerance: Duration,
    started_at: Instant,
    ever_heard: AtomicBool,
}

impl DiscoveryRegistry {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            peers: DashMap::new(),
            tolerance,
            started_at: Instant::now(),
            ever_heard: AtomicBool::new(false),
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Records a pulse, replacing the previous one from the same app.
    ///
    /// A pulse older than the stored one from the same app incarnation (same
    /// start time) is ignored; returns whether the pulse was kept.
    pub fn store(&self, pulse: HeartBeatPulse) -> bool {
        self.ever_heard.store(true, Ordering::Relaxed);

        match self.peers.entry(pulse.app_id.clone()) {
            Entry::Occupied(mut entry) => {
                if is_regression(entry.get(), &pulse) {
                    debug!(app_id = %pulse.app_id, "Ignoring out-of-order heartbeat pulse");
                    return false;
                }
                entry.insert(pulse);
            }
            Entry::Vacant(entry) => {
                trace!(app_id = %pulse.app_id, "First heartbeat pulse from peer");
                entry.insert(pulse);
            }
        }
        true
    }

    /// Pulses received within the tolerance window.
    pub fn query(&self) -> Vec<HeartBeatPulse> {
        let now = Utc::now();
        self.peers
            .iter()
            .filter(|e| self.is_fresh(e.value(), now))
            .map(|e| e.value().clone())
            .collect()
    }

    /// The live pulse of one peer, if any.
    pub fn get(&self, app_id: &str) -> Option<HeartBeatPulse> {
        let now = Utc::now();
        self.peers
            .get(app_id)
            .filter(|e| self.is_fresh(e.value(), now))
            .map(|e| e.value().clone())
    }

    /// Drops every entry outside the tolerance window; returns how many.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let before = self.peers.len();
        self.peers.retain(|_, pulse| self.is_fresh(pulse, now));
        let removed = before.saturating_sub(self.peers.len());
        if removed > 0 {
            debug!(removed, "Removed stale heartbeats");
        }
        removed
    }

    /// Unhealthy only when nothing was ever heard and twice the tolerance has
    /// passed since startup.
    pub fn is_healthy(&self) -> bool {
        self.ever_heard.load(Ordering::Relaxed)
            || self.started_at.elapsed() <= self.tolerance.saturating_mul(2)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Releases map capacity left behind by swept peers.
    pub fn shrink(&self) {
        self.peers.shrink_to_fit();
    }

    fn is_fresh(&self, pulse: &HeartBeatPulse, now: DateTime<Utc>) -> bool {
        let Some(sent) = pulse
            .current_system_time
            .as_ref()
            .and_then(timestamp::from_timestamp)
        else {
            return false;
        };
        match chrono::Duration::from_std(self.tolerance)
            .ok()
            .and_then(|tolerance| now.checked_sub_signed(tolerance))
        {
            Some(cutoff) => sent >= cutoff,
            None => true,
        }
    }
}

fn is_regression(existing: &HeartBeatPulse, incoming: &HeartBeatPulse) -> bool {
    if existing.app_start_time != incoming.app_start_time {
        return false;
    }
    match (&existing.current_system_time, &incoming.current_system_time) {
        (Some(old), Some(new)) => timestamp::sort_key(new) < timestamp::sort_key(old),
        _ => false,
    }
}

impl MonitorableService for DiscoveryRegistry {
    fn service_name(&self) -> &str {
        "DiscoveryRegistry"
    }

    fn is_healthy(&self) -> bool {
        DiscoveryRegistry::is_healthy(self)
    }
}
