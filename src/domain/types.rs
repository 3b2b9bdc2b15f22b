//! Shared types for the geofence tracker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for backend user IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single geographic fix from the position source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

impl Position {
    #[inline]
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self { latitude, longitude, timestamp, accuracy_meters: None }
    }

    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }
}

/// A circular zone with all three parameters present
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_meters: f64,
}

/// A user's assigned zone, or the absence of one
///
/// Replaced wholesale on every resync, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneConfig {
    #[default]
    None,
    Circle(Zone),
}

impl ZoneConfig {
    /// Build a zone from individually optional fields.
    ///
    /// Partial presence collapses to `ZoneConfig::None`, as do non-finite
    /// coordinates and negative radii.
    pub fn from_parts(
        center_latitude: Option<f64>,
        center_longitude: Option<f64>,
        radius_meters: Option<f64>,
    ) -> Self {
        match (center_latitude, center_longitude, radius_meters) {
            (Some(lat), Some(lng), Some(radius))
                if lat.is_finite() && lng.is_finite() && radius.is_finite() && radius >= 0.0 =>
            {
                ZoneConfig::Circle(Zone {
                    center_latitude: lat,
                    center_longitude: lng,
                    radius_meters: radius,
                })
            }
            _ => ZoneConfig::None,
        }
    }

    pub fn circle(center_latitude: f64, center_longitude: f64, radius_meters: f64) -> Self {
        Self::from_parts(Some(center_latitude), Some(center_longitude), Some(radius_meters))
    }

    #[inline]
    pub fn zone(&self) -> Option<&Zone> {
        match self {
            ZoneConfig::Circle(zone) => Some(zone),
            ZoneConfig::None => None,
        }
    }

    #[inline]
    pub fn is_assigned(&self) -> bool {
        matches!(self, ZoneConfig::Circle(_))
    }

    /// Zone center as (latitude, longitude), if a zone is assigned
    pub fn center(&self) -> Option<(f64, f64)> {
        self.zone().map(|z| (z.center_latitude, z.center_longitude))
    }
}

/// Classification of a position against the current zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneState {
    NoZone,
    Inside,
    Outside,
}

impl ZoneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneState::NoZone => "no_zone",
            ZoneState::Inside => "inside",
            ZoneState::Outside => "outside",
        }
    }
}

/// Derived zone status for one position (never persisted)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub state: ZoneState,
    /// Undefined when no zone is configured
    pub distance_meters: Option<f64>,
}

impl ZoneStatus {
    pub const NO_ZONE: ZoneStatus = ZoneStatus { state: ZoneState::NoZone, distance_meters: None };

    /// The `insideZone` wire value: `None` when no zone is configured
    pub fn inside_zone(&self) -> Option<bool> {
        match self.state {
            ZoneState::Inside => Some(true),
            ZoneState::Outside => Some(false),
            ZoneState::NoZone => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Entered,
    Exited,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Entered => "entered",
            TransitionKind::Exited => "exited",
        }
    }
}

/// Edge event emitted when the classification flips across the boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub kind: TransitionKind,
    pub at_position: Position,
    pub distance_meters: f64,
}

/// Item produced by a position source
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    Fix(Position),
    /// Terminal failure: permission revoked, location service disabled, ...
    Unavailable(String),
}

/// Whether the engine is currently consuming positions
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrackingState {
    /// No fix processed yet (or restarted after a failure)
    #[default]
    Waiting,
    Active,
    Unavailable { reason: String },
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::Waiting => "waiting",
            TrackingState::Active => "active",
            TrackingState::Unavailable { .. } => "unavailable",
        }
    }

    #[inline]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TrackingState::Unavailable { .. })
    }
}

/// Read-only view of the engine for the presentation layer
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatusSnapshot {
    pub tracking: TrackingState,
    /// `None` until the first position is processed
    pub status: Option<ZoneStatus>,
    pub last_position: Option<Position>,
    /// Current zone; a new center is a hint to recenter the map
    pub zone: ZoneConfig,
}
