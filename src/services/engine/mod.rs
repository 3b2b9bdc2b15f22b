//! Geofence engine - zone state and per-position orchestration
//!
//! The engine owns the current zone, the transition tracker and the status
//! snapshot behind a single mutex. Per position:
//! evaluate -> update snapshot -> tracker -> location report -> alert (if any).
//!
//! The critical section never awaits. Telemetry is queued after the lock is
//! released, from values copied inside it.

mod runtime;

pub use runtime::{run_positions, spawn_engine, EngineHandle, EngineOptions};

use crate::domain::types::{
    Position, StatusSnapshot, TrackingState, TransitionEvent, UserId, ZoneConfig, ZoneStatus,
};
use crate::infra::metrics::Metrics;
use crate::services::evaluator::evaluate;
use crate::services::telemetry::TelemetryDispatcher;
use crate::services::transition::TransitionTracker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything a single position or zone update touches
struct EngineState {
    zone: ZoneConfig,
    tracker: TransitionTracker,
    snapshot: StatusSnapshot,
}

/// Result of processing one position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub status: ZoneStatus,
    pub transition: Option<TransitionEvent>,
}

pub struct GeofenceEngine {
    user_id: UserId,
    state: Mutex<EngineState>,
    status_tx: watch::Sender<StatusSnapshot>,
    telemetry: TelemetryDispatcher,
    metrics: Arc<Metrics>,
}

impl GeofenceEngine {
    /// Create an engine for an authenticated identity and its initial zone
    pub fn new(
        user_id: UserId,
        initial_zone: ZoneConfig,
        telemetry: TelemetryDispatcher,
        metrics: Arc<Metrics>,
    ) -> Self {
        let snapshot = StatusSnapshot { zone: initial_zone, ..Default::default() };
        let (status_tx, _) = watch::channel(snapshot.clone());

        info!(
            user_id = %user_id,
            zone_assigned = %initial_zone.is_assigned(),
            "engine_created"
        );

        Self {
            user_id,
            state: Mutex::new(EngineState {
                zone: initial_zone,
                tracker: TransitionTracker::new(),
                snapshot,
            }),
            status_tx,
            telemetry,
            metrics,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Zone currently in effect
    pub fn zone(&self) -> ZoneConfig {
        self.state.lock().zone
    }

    /// Copy of the current status for polling
    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().snapshot.clone()
    }

    /// Requests waiting for the telemetry worker
    pub fn telemetry_queue_depth(&self) -> usize {
        self.telemetry.queue_depth()
    }

    /// Observe status changes
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Process one fix from the position source.
    ///
    /// Returns `None` without touching state or telemetry while tracking is
    /// unavailable.
    pub fn on_position(&self, position: Position) -> Option<Evaluation> {
        let start = Instant::now();

        let evaluation = {
            let mut state = self.state.lock();
            if state.snapshot.tracking.is_unavailable() {
                self.metrics.record_position_ignored();
                debug!(user_id = %self.user_id, "position_ignored_unavailable");
                return None;
            }

            let status = evaluate(&state.zone, &position);
            state.snapshot.tracking = TrackingState::Active;
            state.snapshot.status = Some(status);
            state.snapshot.last_position = Some(position);
            let transition = state.tracker.observe(&status, &position);
            self.status_tx.send_replace(state.snapshot.clone());

            Evaluation { status, transition }
        };

        // Always report, transition or not: this is the authoritative channel
        self.telemetry.report_location(self.user_id, &position, &evaluation.status);

        if let Some(ref event) = evaluation.transition {
            self.metrics.record_transition(event.kind);
            info!(
                user_id = %self.user_id,
                kind = %event.kind.as_str(),
                distance_m = format!("{:.1}", event.distance_meters),
                latitude = %event.at_position.latitude,
                longitude = %event.at_position.longitude,
                "zone_transition"
            );
            self.telemetry.report_transition(self.user_id, event);
        }

        let latency_us = start.elapsed().as_micros() as u64;
        self.metrics.record_position_processed(latency_us);
        debug!(
            user_id = %self.user_id,
            state = %evaluation.status.state.as_str(),
            distance_m = ?evaluation.status.distance_meters,
            latency_us = %latency_us,
            "position_processed"
        );

        Some(evaluation)
    }

    /// Atomically replace the zone. Returns whether it changed.
    ///
    /// The last position is not re-evaluated; the next fix uses the new zone.
    pub fn on_zone_updated(&self, zone: ZoneConfig) -> bool {
        let mut state = self.state.lock();
        if state.zone == zone {
            return false;
        }
        state.zone = zone;
        state.snapshot.zone = zone;
        self.status_tx.send_replace(state.snapshot.clone());
        true
    }

    /// Terminal position source failure: stop processing until restarted
    pub fn on_source_failure(&self, reason: &str) {
        let mut state = self.state.lock();
        state.snapshot.tracking = TrackingState::Unavailable { reason: reason.to_string() };
        self.status_tx.send_replace(state.snapshot.clone());
        self.metrics.record_source_failure();
        warn!(user_id = %self.user_id, reason = %reason, "position_source_unavailable");
    }

    /// External restart after a source failure. Returns whether the engine
    /// was unavailable. Transition state is kept.
    pub fn restart(&self) -> bool {
        let mut state = self.state.lock();
        if !state.snapshot.tracking.is_unavailable() {
            return false;
        }
        let previous = std::mem::replace(&mut state.snapshot.tracking, TrackingState::Waiting);
        self.status_tx.send_replace(state.snapshot.clone());
        info!(user_id = %self.user_id, from = %previous.as_str(), "tracking_restarted");
        true
    }
}
