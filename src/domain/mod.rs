//! Domain models - core geofence types
//!
//! This module contains the canonical data types used throughout the system:
//! - `ZoneConfig` - a user's circular zone, or its absence
//! - `Position` - a geographic fix from the position source
//! - `ZoneStatus` - inside/outside/no-zone classification with distance
//! - `TransitionEvent` - edge event when the boundary is crossed
//! - `UserRecord` - backend user record and its lenient decoder

pub mod types;
pub mod zone_record;

// Re-export commonly used types at module level
pub use types::{
    Position, PositionUpdate, StatusSnapshot, TrackingState, TransitionEvent, TransitionKind,
    UserId, Zone, ZoneConfig, ZoneState, ZoneStatus,
};
pub use zone_record::{decode_zone, DecodeError, UserRecord};
