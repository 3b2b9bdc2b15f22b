//! Position feed TCP listener
//!
//! Listens on port 5870 for a position provider (device bridge, simulator).
//! Protocol: one JSON object per line.
//! - Fix: `{"latitude": 34.0, "longitude": 35.0, "timestamp": "...", "accuracy": 5.0}`
//!   (`lat`/`lng` accepted; timestamp is RFC 3339 or epoch milliseconds)
//! - Failure: `{"unavailable": "permission revoked"}`

use crate::domain::types::{Position, PositionUpdate};
use crate::infra::metrics::Metrics;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Position listener configuration
#[derive(Debug, Clone)]
pub struct PositionListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for PositionListenerConfig {
    fn default() -> Self {
        Self { port: 5870, enabled: true }
    }
}

#[derive(Debug, Error)]
pub enum LineError {
    #[error("malformed position line: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("coordinates out of range: lat={latitude} lng={longitude}")]
    OutOfRange { latitude: f64, longitude: f64 },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireLine {
    Unavailable { unavailable: String },
    Fix(WireFix),
}

#[derive(Deserialize)]
struct WireFix {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    longitude: f64,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    accuracy: Option<f64>,
}

/// Accepts RFC 3339 strings or epoch milliseconds
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = Option<DateTime<Utc>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an RFC 3339 timestamp or epoch milliseconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|_| E::custom(format!("invalid timestamp: {}", value)))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Utc.timestamp_millis_opt(value)
                .single()
                .map(Some)
                .ok_or_else(|| E::custom(format!("timestamp out of range: {}", value)))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            let value = i64::try_from(value)
                .map_err(|_| E::custom(format!("timestamp out of range: {}", value)))?;
            self.visit_i64(value)
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            if !value.is_finite() {
                return Err(E::custom("timestamp is not finite"));
            }
            self.visit_i64(value as i64)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Parse one protocol line. A fix without a timestamp is stamped with
/// `received_at`.
pub fn parse_position_line(
    line: &str,
    received_at: DateTime<Utc>,
) -> Result<PositionUpdate, LineError> {
    let fix = match serde_json::from_str::<WireLine>(line)? {
        WireLine::Unavailable { unavailable } => return Ok(PositionUpdate::Unavailable(unavailable)),
        WireLine::Fix(fix) => fix,
    };

    let in_range = fix.latitude.is_finite()
        && fix.longitude.is_finite()
        && (-90.0..=90.0).contains(&fix.latitude)
        && (-180.0..=180.0).contains(&fix.longitude);
    if !in_range {
        return Err(LineError::OutOfRange { latitude: fix.latitude, longitude: fix.longitude });
    }

    let mut position =
        Position::new(fix.latitude, fix.longitude, fix.timestamp.unwrap_or(received_at));
    if let Some(accuracy) = fix.accuracy.filter(|a| a.is_finite() && *a >= 0.0) {
        position = position.with_accuracy(accuracy);
    }
    Ok(PositionUpdate::Fix(position))
}

/// Start the position TCP listener
///
/// Fixes are sent via try_send so a slow engine never backs up the socket;
/// drops are counted in metrics. Failure signals are never dropped.
pub async fn start_position_listener(
    config: PositionListenerConfig,
    position_tx: mpsc::Sender<PositionUpdate>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("position_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %config.port, "position_listener_started");
    serve_positions(listener, position_tx, metrics, shutdown).await;
    Ok(())
}

/// Accept loop on an already bound listener
pub async fn serve_positions(
    listener: TcpListener,
    position_tx: mpsc::Sender<PositionUpdate>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    info!("position_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let tx = position_tx.clone();
                        let m = metrics.clone();
                        tokio::spawn(async move {
                            handle_position_connection(socket, addr, tx, m).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "position_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_position_connection(
    socket: TcpStream,
    addr: SocketAddr,
    position_tx: mpsc::Sender<PositionUpdate>,
    metrics: Arc<Metrics>,
) {
    let peer = addr.to_string();
    debug!(peer = %peer, "position_connection_accepted");

    let mut lines = BufReader::new(socket).lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let update = match parse_position_line(line, Utc::now()) {
            Ok(update) => update,
            Err(e) => {
                debug!(peer = %peer, error = %e, "position_line_skipped");
                continue;
            }
        };

        match update {
            PositionUpdate::Fix(position) => match position_tx.try_send(PositionUpdate::Fix(position)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    metrics.record_position_dropped();
                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                        warn!(peer = %peer, "position_dropped: channel full");
                        last_drop_warn = Instant::now();
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(peer = %peer, "position_channel_closed");
                    break;
                }
            },
            PositionUpdate::Unavailable(reason) => {
                info!(peer = %peer, reason = %reason, "position_source_failure_received");
                if position_tx.send(PositionUpdate::Unavailable(reason)).await.is_err() {
                    warn!(peer = %peer, "position_channel_closed");
                    break;
                }
            }
        }
    }

    debug!(peer = %peer, "position_connection_closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn fix(update: PositionUpdate) -> Position {
        match update {
            PositionUpdate::Fix(p) => p,
            other => panic!("expected fix, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_full_fix() {
        let line = r#"{"latitude": 34.0, "longitude": 35.0, "timestamp": "2024-05-01T10:00:00Z", "accuracy": 4.5}"#;
        let p = fix(parse_position_line(line, received_at()).unwrap());
        assert_eq!(p.latitude, 34.0);
        assert_eq!(p.longitude, 35.0);
        assert_eq!(p.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert_eq!(p.accuracy_meters, Some(4.5));
    }

    #[test]
    fn test_parse_short_names_and_epoch_millis() {
        let line = r#"{"lat": -33.5, "lng": 151.2, "timestamp": 1714557600000}"#;
        let p = fix(parse_position_line(line, received_at()).unwrap());
        assert_eq!(p.latitude, -33.5);
        assert_eq!(p.longitude, 151.2);
        assert_eq!(p.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert_eq!(p.accuracy_meters, None);
    }

    #[test]
    fn test_missing_timestamp_uses_receive_time() {
        let p = fix(parse_position_line(r#"{"lat": 1.0, "lng": 2.0}"#, received_at()).unwrap());
        assert_eq!(p.timestamp, received_at());

        let p = fix(
            parse_position_line(r#"{"lat": 1.0, "lng": 2.0, "timestamp": null}"#, received_at())
                .unwrap(),
        );
        assert_eq!(p.timestamp, received_at());
    }

    #[test]
    fn test_parse_unavailable() {
        let update =
            parse_position_line(r#"{"unavailable": "permission revoked"}"#, received_at()).unwrap();
        assert_eq!(update, PositionUpdate::Unavailable("permission revoked".to_string()));
    }

    #[test]
    fn test_rejects_bad_lines() {
        assert!(matches!(
            parse_position_line(r#"{"lat": 91.0, "lng": 0.0}"#, received_at()),
            Err(LineError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_position_line(r#"{"lat": 0.0, "lng": -180.5}"#, received_at()),
            Err(LineError::OutOfRange { .. })
        ));
        assert!(parse_position_line(r#"{"lat": 34.0}"#, received_at()).is_err());
        assert!(parse_position_line("not json", received_at()).is_err());
        assert!(
            parse_position_line(r#"{"lat": 1.0, "lng": 2.0, "timestamp": "yesterday"}"#, received_at())
                .is_err()
        );
    }

    #[test]
    fn test_negative_accuracy_is_dropped() {
        let line = r#"{"lat": 1.0, "lng": 2.0, "accuracy": -3.0}"#;
        let p = fix(parse_position_line(line, received_at()).unwrap());
        assert_eq!(p.accuracy_meters, None);
    }

    #[tokio::test]
    async fn test_listener_forwards_lines_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve_positions(listener, tx, metrics, shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"{\"lat\": 34.0, \"lng\": 35.0}\n\
                  garbage\n\
                  \n\
                  {\"lat\": 34.001, \"lng\": 35.0}\n\
                  {\"unavailable\": \"location disabled\"}\n",
            )
            .await
            .unwrap();

        let timeout = Duration::from_secs(5);
        let first = tokio::time::timeout(timeout, rx.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(timeout, rx.recv()).await.unwrap().unwrap();
        let third = tokio::time::timeout(timeout, rx.recv()).await.unwrap().unwrap();

        assert_eq!(fix(first).latitude, 34.0);
        assert_eq!(fix(second).latitude, 34.001);
        assert_eq!(third, PositionUpdate::Unavailable("location disabled".to_string()));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(timeout, server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_full_channel_drops_fixes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let metrics = Arc::new(Metrics::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(serve_positions(listener, tx, metrics.clone(), shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"{\"lat\": 1.0, \"lng\": 1.0}\n{\"lat\": 2.0, \"lng\": 2.0}\n{\"lat\": 3.0, \"lng\": 3.0}\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        // Nothing consumes yet, so the channel stays full after the first fix
        for _ in 0..100 {
            if metrics.positions_dropped() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(metrics.positions_dropped(), 2);

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(fix(first).latitude, 1.0);
    }
}
