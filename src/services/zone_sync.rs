//! Periodic zone resync from the authoritative backend record
//!
//! Fixed period, no backoff. A failed or malformed fetch leaves the previous
//! zone in effect until the next tick. A changed zone is swapped into the
//! engine atomically.

use crate::domain::types::ZoneConfig;
use crate::infra::metrics::Metrics;
use crate::io::backend::ZoneSource;
use crate::services::engine::GeofenceEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of a single resync attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    Unchanged,
    Updated(ZoneConfig),
    Failed,
}

pub struct ZoneSyncScheduler {
    engine: Arc<GeofenceEngine>,
    source: Arc<dyn ZoneSource>,
    interval: Duration,
    metrics: Arc<Metrics>,
}

impl ZoneSyncScheduler {
    pub fn new(
        engine: Arc<GeofenceEngine>,
        source: Arc<dyn ZoneSource>,
        interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { engine, source, interval, metrics }
    }

    /// Fetch once and swap the zone in if it differs
    pub async fn sync_once(&self) -> SyncOutcome {
        let user_id = self.engine.user_id();

        // No engine lock is held across this await
        let zone = match self.source.fetch_zone(user_id).await {
            Ok(zone) => zone,
            Err(e) => {
                self.metrics.record_resync(false, false);
                warn!(user_id = %user_id, error = %e, "zone_resync_failed");
                return SyncOutcome::Failed;
            }
        };

        if !self.engine.on_zone_updated(zone) {
            self.metrics.record_resync(true, false);
            debug!(user_id = %user_id, "zone_resync_unchanged");
            return SyncOutcome::Unchanged;
        }

        self.metrics.record_resync(true, true);
        match zone.zone() {
            // New center is advisory for the presentation layer (map recenter)
            Some(z) => info!(
                user_id = %user_id,
                center_lat = %z.center_latitude,
                center_lng = %z.center_longitude,
                radius_m = %z.radius_meters,
                "zone_updated"
            ),
            None => info!(user_id = %user_id, "zone_removed"),
        }
        SyncOutcome::Updated(zone)
    }

    /// Tick every `interval` until shutdown. The first fetch happens one
    /// interval after start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = %self.interval.as_secs(), "zone_sync_started");

        loop {
            tokio::select! {
                biased;

                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            // A fetch in flight must not delay shutdown
            tokio::select! {
                biased;

                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.sync_once() => {}
            }
        }

        info!("zone_sync_stopped");
    }
}
