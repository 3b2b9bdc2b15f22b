//! End-to-end tests: position feed -> engine -> telemetry sink, with fakes
//! standing in for the backend

use async_trait::async_trait;
use chrono::Utc;
use geofence_tracker::domain::{
    Position, PositionUpdate, TrackingState, UserId, ZoneConfig, ZoneState,
};
use geofence_tracker::infra::Metrics;
use geofence_tracker::io::position_feed::serve_positions;
use geofence_tracker::io::{AlertReport, BackendError, LocationReport, TelemetrySink, ZoneSource};
use geofence_tracker::services::evaluator::destination_point;
use geofence_tracker::services::{spawn_engine, EngineOptions};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

#[derive(Default)]
struct CapturingSink {
    locations: Mutex<Vec<LocationReport>>,
    alerts: Mutex<Vec<AlertReport>>,
}

#[async_trait]
impl TelemetrySink for CapturingSink {
    async fn send_location(&self, report: &LocationReport) -> Result<(), BackendError> {
        self.locations.lock().push(report.clone());
        Ok(())
    }

    async fn send_alert(&self, alert: &AlertReport) -> Result<(), BackendError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Backend whose zone can be swapped by the test
struct MutableZone(Mutex<ZoneConfig>);

#[async_trait]
impl ZoneSource for MutableZone {
    async fn fetch_zone(&self, _user_id: UserId) -> Result<ZoneConfig, BackendError> {
        Ok(*self.0.lock())
    }
}

fn line_at(distance_m: f64) -> String {
    let (lat, lng) = destination_point(34.0, 35.0, 90.0, distance_m);
    format!("{{\"lat\": {}, \"lng\": {}}}\n", lat, lng)
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_feed_to_backend_crossing() {
    let metrics = Arc::new(Metrics::new());
    let sink = Arc::new(CapturingSink::default());
    let zone = ZoneConfig::circle(34.0, 35.0, 50.0);
    let source = Arc::new(MutableZone(Mutex::new(zone)));
    let (tx, rx) = mpsc::channel(64);

    let handle = spawn_engine(
        UserId(3),
        zone,
        sink.clone(),
        source,
        rx,
        EngineOptions { sync_interval: Duration::from_secs(3600), telemetry_queue_size: 64 },
        metrics.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve_positions(listener, tx, metrics.clone(), shutdown_rx));

    let mut client = TcpStream::connect(addr).await.unwrap();
    for d in [60.0, 20.0, 80.0, 90.0, 100.0] {
        client.write_all(line_at(d).as_bytes()).await.unwrap();
    }

    wait_for(|| sink.locations.lock().len() == 5).await;
    wait_for(|| sink.alerts.lock().len() == 1).await;

    let inside: Vec<_> = sink.locations.lock().iter().map(|r| r.inside_zone).collect();
    assert_eq!(inside, vec![Some(false), Some(true), Some(false), Some(false), Some(false)]);
    assert_eq!(sink.alerts.lock()[0].user_id, UserId(3));

    let snapshot = handle.engine().snapshot();
    assert_eq!(snapshot.tracking, TrackingState::Active);
    assert_eq!(snapshot.status.unwrap().state, ZoneState::Outside);

    // Source failure over the wire stops processing
    client.write_all(b"{\"unavailable\": \"gps off\"}\n").await.unwrap();
    wait_for(|| handle.engine().snapshot().tracking.is_unavailable()).await;

    client.write_all(line_at(10.0).as_bytes()).await.unwrap();
    wait_for(|| metrics.report().positions_ignored == 1).await;
    assert_eq!(sink.locations.lock().len(), 5);

    let _ = shutdown_tx.send(true);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resync_removes_zone_while_inside() {
    let metrics = Arc::new(Metrics::new());
    let sink = Arc::new(CapturingSink::default());
    let zone = ZoneConfig::circle(34.0, 35.0, 50.0);
    let source = Arc::new(MutableZone(Mutex::new(zone)));
    let (tx, rx) = mpsc::channel(64);

    let handle = spawn_engine(
        UserId(3),
        zone,
        sink.clone(),
        source.clone(),
        rx,
        EngineOptions { sync_interval: Duration::from_secs(10), telemetry_queue_size: 64 },
        metrics,
    );

    let (lat, lng) = destination_point(34.0, 35.0, 0.0, 10.0);
    let inside = Position::new(lat, lng, Utc::now());
    tx.send(PositionUpdate::Fix(inside)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.engine().snapshot().status.unwrap().state, ZoneState::Inside);

    // Backend removes the zone; the next tick picks it up
    *source.0.lock() = ZoneConfig::None;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.engine().zone(), ZoneConfig::None);

    let (lat, lng) = destination_point(34.0, 35.0, 0.0, 500.0);
    let far = Position::new(lat, lng, Utc::now());
    tx.send(PositionUpdate::Fix(far)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(handle.engine().snapshot().status.unwrap().state, ZoneState::NoZone);
    assert!(sink.alerts.lock().is_empty());
    let inside_zone: Vec<_> = sink.locations.lock().iter().map(|r| r.inside_zone).collect();
    assert_eq!(inside_zone, vec![Some(true), None]);

    handle.shutdown().await;
}
