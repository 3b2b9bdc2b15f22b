//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `evaluator` - Haversine distance and inside/outside classification
//! - `transition` - Edge-triggered entry/exit detection with one-shot exit alerts
//! - `telemetry` - Fire-and-forget location report and alert dispatch
//! - `zone_sync` - Periodic zone resync from the backend
//! - `engine` - Central per-position orchestrator and its tasks

pub mod engine;
pub mod evaluator;
pub mod telemetry;
pub mod transition;
pub mod zone_sync;

// Re-export commonly used types
pub use engine::{spawn_engine, EngineHandle, EngineOptions, Evaluation, GeofenceEngine};
pub use evaluator::{evaluate, haversine_distance};
pub use telemetry::{create_telemetry_dispatcher, TelemetryDispatcher, TelemetryWorker};
pub use transition::TransitionTracker;
pub use zone_sync::{SyncOutcome, ZoneSyncScheduler};
