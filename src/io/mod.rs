//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `backend` - HTTP client for the user record, location reports and alerts
//! - `position_feed` - TCP listener for position fixes and source failures
//! - `status_server` - Prometheus metrics and status HTTP endpoint

pub mod backend;
pub mod position_feed;
pub mod status_server;

// Re-export commonly used types
pub use backend::{
    AlertReport, AlertType, BackendClient, BackendError, LocationReport, TelemetrySink, ZoneSource,
};
pub use position_feed::{parse_position_line, start_position_listener, PositionListenerConfig};
pub use status_server::start_status_server;
