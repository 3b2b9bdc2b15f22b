//! Geofence evaluation - pure distance and inside/outside classification
//!
//! Distances are great-circle (haversine) on a sphere of Earth's mean radius.
//! No ellipsoid correction: consumer GPS noise dwarfs the spherical error.

use crate::domain::types::{Position, ZoneConfig, ZoneState, ZoneStatus};

/// IUGG mean Earth radius in meters
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters between two (lat, lng) points in degrees
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Clamp guards asin against a > 1.0 from rounding on antipodal points
    2.0 * EARTH_MEAN_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Point reached by travelling `distance_m` from (lat, lng) on `bearing_deg`
/// (true north clockwise). Returns (latitude, longitude) in degrees.
pub fn destination_point(lat: f64, lng: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let delta = distance_m / EARTH_MEAN_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi1 = lat.to_radians();
    let lambda1 = lng.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    // Normalize longitude to [-180, 180)
    let lng2 = (lambda2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
    (phi2.to_degrees(), lng2)
}

/// Classify `position` against `zone`.
///
/// The boundary is inclusive: a distance equal to the radius is Inside.
pub fn evaluate(zone: &ZoneConfig, position: &Position) -> ZoneStatus {
    let Some(zone) = zone.zone() else {
        return ZoneStatus::NO_ZONE;
    };

    let distance = haversine_distance(
        zone.center_latitude,
        zone.center_longitude,
        position.latitude,
        position.longitude,
    );
    let state = if distance <= zone.radius_meters { ZoneState::Inside } else { ZoneState::Outside };

    ZoneStatus { state, distance_meters: Some(distance) }
}
