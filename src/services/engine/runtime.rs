//! Engine task wiring - position consumer, zone sync, telemetry worker
//!
//! All three tasks share one shutdown watch channel. `EngineHandle::shutdown`
//! signals it and awaits every task, so nothing keeps running against a
//! stale identity after logout.

use super::GeofenceEngine;
use crate::domain::types::{PositionUpdate, UserId, ZoneConfig};
use crate::infra::metrics::Metrics;
use crate::io::backend::{TelemetrySink, ZoneSource};
use crate::services::telemetry::create_telemetry_dispatcher;
use crate::services::zone_sync::ZoneSyncScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub sync_interval: Duration,
    pub telemetry_queue_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { sync_interval: Duration::from_secs(10), telemetry_queue_size: 256 }
    }
}

/// Owns the running engine tasks
pub struct EngineHandle {
    engine: Arc<GeofenceEngine>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<GeofenceEngine> {
        &self.engine
    }

    /// Stop the position subscription, the resync timer and the telemetry
    /// worker, and wait for all of them to finish
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send_replace(true);
        for (name, task) in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "engine_task_join_failed");
            }
        }
        info!(user_id = %self.engine.user_id(), "engine_stopped");
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        // Dropped without shutdown(): still stop the tasks, just don't wait
        self.shutdown_tx.send_replace(true);
    }
}

/// Consume position updates in arrival order until the source closes or
/// shutdown is signalled
pub async fn run_positions(
    engine: Arc<GeofenceEngine>,
    mut positions: mpsc::Receiver<PositionUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(user_id = %engine.user_id(), "position_consumer_started");

    loop {
        tokio::select! {
            biased;

            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            update = positions.recv() => {
                match update {
                    Some(PositionUpdate::Fix(position)) => {
                        engine.on_position(position);
                    }
                    Some(PositionUpdate::Unavailable(reason)) => {
                        engine.on_source_failure(&reason);
                    }
                    None => {
                        info!("position_source_closed");
                        break;
                    }
                }
            }
        }
    }

    info!(user_id = %engine.user_id(), "position_consumer_stopped");
}

/// Build the engine and spawn its tasks on the current tokio runtime
pub fn spawn_engine(
    user_id: UserId,
    initial_zone: ZoneConfig,
    sink: Arc<dyn TelemetrySink>,
    zone_source: Arc<dyn ZoneSource>,
    positions: mpsc::Receiver<PositionUpdate>,
    options: EngineOptions,
    metrics: Arc<Metrics>,
) -> EngineHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (dispatcher, worker) =
        create_telemetry_dispatcher(sink, metrics.clone(), options.telemetry_queue_size);
    let engine = Arc::new(GeofenceEngine::new(user_id, initial_zone, dispatcher, metrics.clone()));
    let scheduler =
        ZoneSyncScheduler::new(engine.clone(), zone_source, options.sync_interval, metrics);

    let tasks = vec![
        ("positions", tokio::spawn(run_positions(engine.clone(), positions, shutdown_rx.clone()))),
        ("zone_sync", tokio::spawn(scheduler.run(shutdown_rx.clone()))),
        ("telemetry", tokio::spawn(worker.run(shutdown_rx))),
    ];

    info!(
        user_id = %user_id,
        sync_interval_secs = %options.sync_interval.as_secs(),
        telemetry_queue_size = %options.telemetry_queue_size,
        "engine_started"
    );

    EngineHandle { engine, shutdown_tx, tasks }
}
