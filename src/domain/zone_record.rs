//! Decoding of backend user records into `ZoneConfig`
//!
//! The backend is loose about numeric encodings: coordinates and radius may
//! arrive as JSON floats, integers, or strings. Zone fields that are missing
//! or cannot be parsed become "absent". The user id is stricter: if it is
//! present it must decode, otherwise the whole record is rejected.

use crate::domain::types::{UserId, ZoneConfig};
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed user record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("user record belongs to {found}, expected {expected}")]
    UserMismatch { expected: UserId, found: UserId },
}

/// User record as returned by `GET /api/users/{userId}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserRecord {
    #[serde(default, deserialize_with = "deserialize_user_id")]
    pub id: Option<UserId>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub zone_center_lat: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub zone_center_lng: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub zone_radius_m: Option<f64>,
}

impl UserRecord {
    pub fn zone(&self) -> ZoneConfig {
        ZoneConfig::from_parts(self.zone_center_lat, self.zone_center_lng, self.zone_radius_m)
    }
}

/// Decode a raw response body into a `UserRecord`
pub fn decode_user_record(body: &[u8]) -> Result<UserRecord, DecodeError> {
    Ok(serde_json::from_slice(body)?)
}

/// Decode a response body into the zone for `expected`.
///
/// A record without an id is accepted; one carrying another user's id is not.
pub fn decode_zone(body: &[u8], expected: UserId) -> Result<ZoneConfig, DecodeError> {
    let record = decode_user_record(body)?;
    match record.id {
        Some(found) if found != expected => Err(DecodeError::UserMismatch { expected, found }),
        _ => Ok(record.zone()),
    }
}

fn parse_f64(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Number-or-string field that never fails: anything unusable is `None`
fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientF64Visitor;

    impl<'de> Visitor<'de> for LenientF64Visitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number, a numeric string, or null")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(Some(value).filter(|v| v.is_finite()))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(parse_f64(value))
        }

        fn visit_bool<E: de::Error>(self, _value: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(self)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(None)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(None)
        }
    }

    deserializer.deserialize_any(LenientF64Visitor)
}

/// Integer-or-string user id; unparseable values are a decode error
fn deserialize_user_id<'de, D>(deserializer: D) -> Result<Option<UserId>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UserIdVisitor;

    impl<'de> Visitor<'de> for UserIdVisitor {
        type Value = Option<UserId>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an integer or integer string user id")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(UserId(value)))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            i64::try_from(value)
                .map(|id| Some(UserId(id)))
                .map_err(|_| E::custom(format!("user id {value} out of range")))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            if value.fract() == 0.0 && value.is_finite() && value.abs() < i64::MAX as f64 {
                Ok(Some(UserId(value as i64)))
            } else {
                Err(E::custom(format!("invalid user id {value}")))
            }
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            value
                .trim()
                .parse::<i64>()
                .map(|id| Some(UserId(id)))
                .map_err(|_| E::custom(format!("invalid user id {value:?}")))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(UserIdVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str =
        r#"{"id": 7, "zone_center_lat": 34.0, "zone_center_lng": 35.0, "zone_radius_m": 50.0}"#;

    #[test]
    fn test_decode_canonical_record() {
        let zone = decode_zone(CANONICAL.as_bytes(), UserId(7)).unwrap();
        assert_eq!(zone, ZoneConfig::circle(34.0, 35.0, 50.0));
    }

    #[test]
    fn test_mixed_numeric_encodings_decode_identically() {
        let canonical = decode_zone(CANONICAL.as_bytes(), UserId(7)).unwrap();

        let strings = r#"{"id": "7", "zone_center_lat": "34.0", "zone_center_lng": " 35 ", "zone_radius_m": "50"}"#;
        let integers = r#"{"id": 7, "zone_center_lat": 34, "zone_center_lng": 35, "zone_radius_m": 50}"#;
        let mixed = r#"{"id": "7", "zone_center_lat": 34, "zone_center_lng": "35.0", "zone_radius_m": 50.0}"#;

        for body in [strings, integers, mixed] {
            assert_eq!(decode_zone(body.as_bytes(), UserId(7)).unwrap(), canonical, "{body}");
        }
    }

    #[test]
    fn test_null_zone_fields_mean_no_zone() {
        let body = r#"{"id": 7, "zone_center_lat": null, "zone_center_lng": null, "zone_radius_m": null}"#;
        assert_eq!(decode_zone(body.as_bytes(), UserId(7)).unwrap(), ZoneConfig::None);

        let missing = r#"{"id": 7, "name": "new user"}"#;
        assert_eq!(decode_zone(missing.as_bytes(), UserId(7)).unwrap(), ZoneConfig::None);
    }

    #[test]
    fn test_unparseable_zone_fields_default_to_absent() {
        let body = r#"{"id": 7, "zone_center_lat": "north", "zone_center_lng": 35.0, "zone_radius_m": 50}"#;
        let record = decode_user_record(body.as_bytes()).unwrap();
        assert_eq!(record.zone_center_lat, None);
        assert_eq!(record.zone(), ZoneConfig::None);

        let odd = r#"{"zone_center_lat": [1], "zone_center_lng": {"x": 1}, "zone_radius_m": true}"#;
        let record = decode_user_record(odd.as_bytes()).unwrap();
        assert_eq!(record.zone(), ZoneConfig::None);
    }

    #[test]
    fn test_partial_zone_is_no_zone() {
        let body = r#"{"id": 7, "zone_center_lat": 34.0, "zone_center_lng": 35.0, "zone_radius_m": null}"#;
        assert_eq!(decode_zone(body.as_bytes(), UserId(7)).unwrap(), ZoneConfig::None);
    }

    #[test]
    fn test_unparseable_user_id_is_error() {
        let body = r#"{"id": "abc", "zone_center_lat": 34.0, "zone_center_lng": 35.0, "zone_radius_m": 50}"#;
        assert!(matches!(decode_zone(body.as_bytes(), UserId(7)), Err(DecodeError::Malformed(_))));

        let fractional = r#"{"id": 7.5}"#;
        assert!(decode_user_record(fractional.as_bytes()).is_err());
    }

    #[test]
    fn test_user_mismatch_is_rejected() {
        let err = decode_zone(CANONICAL.as_bytes(), UserId(8)).unwrap_err();
        assert!(matches!(err, DecodeError::UserMismatch { expected: UserId(8), found: UserId(7) }));
    }

    #[test]
    fn test_record_without_id_is_accepted() {
        let body = r#"{"zone_center_lat": 34.0, "zone_center_lng": 35.0, "zone_radius_m": 50}"#;
        assert!(decode_zone(body.as_bytes(), UserId(7)).unwrap().is_assigned());
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(decode_user_record(b"not json").is_err());
        assert!(decode_user_record(b"42").is_err());
        assert!(decode_user_record(br#""user""#).is_err());
        assert!(decode_user_record(b"").is_err());
    }
}
