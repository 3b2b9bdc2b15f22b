//! Status HTTP endpoint
//!
//! - `GET /metrics` - Prometheus text format
//! - `GET /status` - JSON status snapshot for the presentation layer to poll
//! - `GET /health`
//! - `POST /tracking/restart` - resume after a position source failure
//!
//! Uses hyper for the HTTP server.

use crate::domain::types::ZoneState;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::engine::GeofenceEngine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with user label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    user: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{user=\"{user}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    user: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{user=\"{user}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{user=\"{user}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{user=\"{user}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{user=\"{user}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, engine: &GeofenceEngine) -> String {
    let summary = metrics.report();
    let user = engine.user_id().to_string();
    let mut output = String::with_capacity(4096);

    write_position_metrics(&mut output, &user, &summary);
    write_telemetry_metrics(&mut output, &user, &summary);
    write_zone_metrics(&mut output, &user, &summary, engine);

    write_metric(
        &mut output,
        "geofence_telemetry_queue_depth",
        "Current telemetry queue depth",
        MetricType::Gauge,
        &user,
        engine.telemetry_queue_depth() as u64,
    );

    output
}

fn write_position_metrics(output: &mut String, user: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_positions_total",
        "Total positions evaluated",
        MetricType::Counter,
        user,
        summary.positions_total,
    );
    write_metric(
        output,
        "geofence_positions_dropped_total",
        "Positions dropped at ingest (channel full)",
        MetricType::Counter,
        user,
        summary.positions_dropped,
    );
    write_metric(
        output,
        "geofence_positions_ignored_total",
        "Positions ignored while tracking was unavailable",
        MetricType::Counter,
        user,
        summary.positions_ignored,
    );
    write_histogram(
        output,
        "geofence_eval_latency_us",
        "Per-position processing latency in microseconds",
        user,
        &summary.lat_buckets,
        summary.avg_eval_latency_us,
    );
    write_metric(
        output,
        "geofence_eval_latency_p99_us",
        "99th percentile processing latency",
        MetricType::Gauge,
        user,
        summary.lat_p99_us,
    );
}

fn write_telemetry_metrics(output: &mut String, user: &str, summary: &MetricsSummary) {
    for (name, help, val) in [
        ("geofence_location_reports_sent_total", "Location reports sent", summary.location_reports_sent),
        (
            "geofence_location_reports_failed_total",
            "Location reports that failed",
            summary.location_reports_failed,
        ),
        (
            "geofence_location_reports_dropped_total",
            "Location reports dropped (queue full)",
            summary.location_reports_dropped,
        ),
        ("geofence_alerts_sent_total", "Exit alerts sent", summary.alerts_sent),
        ("geofence_alerts_failed_total", "Exit alerts that failed", summary.alerts_failed),
        ("geofence_alerts_dropped_total", "Exit alerts dropped (queue full)", summary.alerts_dropped),
    ] {
        write_metric(output, name, help, MetricType::Counter, user, val);
    }
}

fn write_zone_metrics(
    output: &mut String,
    user: &str,
    summary: &MetricsSummary,
    engine: &GeofenceEngine,
) {
    let _ = writeln!(output, "# HELP geofence_transitions_total Zone transitions observed");
    let _ = writeln!(output, "# TYPE geofence_transitions_total counter");
    let _ = writeln!(
        output,
        "geofence_transitions_total{{user=\"{user}\",kind=\"entered\"}} {}",
        summary.transitions_entered
    );
    let _ = writeln!(
        output,
        "geofence_transitions_total{{user=\"{user}\",kind=\"exited\"}} {}",
        summary.transitions_exited
    );

    let _ = writeln!(output, "# HELP geofence_zone_resync_total Zone resync attempts");
    let _ = writeln!(output, "# TYPE geofence_zone_resync_total counter");
    let _ = writeln!(
        output,
        "geofence_zone_resync_total{{user=\"{user}\",result=\"ok\"}} {}",
        summary.resync_ok
    );
    let _ = writeln!(
        output,
        "geofence_zone_resync_total{{user=\"{user}\",result=\"failed\"}} {}",
        summary.resync_failed
    );
    write_metric(
        output,
        "geofence_zone_changes_total",
        "Resyncs that changed the zone",
        MetricType::Counter,
        user,
        summary.resync_changed,
    );
    write_metric(
        output,
        "geofence_source_failures_total",
        "Position source failures",
        MetricType::Counter,
        user,
        summary.source_failures,
    );

    let snapshot = engine.snapshot();
    write_metric(
        output,
        "geofence_zone_assigned",
        "Whether a zone is configured (0/1)",
        MetricType::Gauge,
        user,
        snapshot.zone.is_assigned() as u64,
    );
    let inside = matches!(snapshot.status.map(|s| s.state), Some(ZoneState::Inside));
    write_metric(
        output,
        "geofence_inside_zone",
        "Whether the last position was inside the zone (0/1)",
        MetricType::Gauge,
        user,
        inside as u64,
    );
    write_metric(
        output,
        "geofence_tracking_unavailable",
        "Whether the position source has failed (0/1)",
        MetricType::Gauge,
        user,
        snapshot.tracking.is_unavailable() as u64,
    );
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Route a request to its response
fn respond(
    method: &Method,
    path: &str,
    engine: &GeofenceEngine,
    metrics: &Metrics,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(metrics, engine);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::GET, "/status") => match serde_json::to_string(&engine.snapshot()) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => {
                warn!(error = %e, "status_serialize_failed");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    r#"{"ok":false,"error":"serialize_failed"}"#.to_string(),
                )
            }
        },
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        (&Method::POST, "/tracking/restart") => {
            if engine.restart() {
                json_response(StatusCode::OK, r#"{"ok":true}"#.to_string())
            } else {
                json_response(
                    StatusCode::CONFLICT,
                    r#"{"ok":false,"error":"tracking_not_unavailable"}"#.to_string(),
                )
            }
        }
        // CORS preflight for tracking/restart
        (&Method::OPTIONS, "/tracking/restart") => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail"),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    engine: Arc<GeofenceEngine>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(respond(req.method(), req.uri().path(), &engine, &metrics))
}

/// Start the status HTTP server
pub async fn start_status_server(
    port: u16,
    engine: Arc<GeofenceEngine>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, user_id = %engine.user_id(), "status_server_started");
    serve_status(listener, engine, metrics, shutdown).await;
    Ok(())
}

/// Accept loop on an already bound listener
pub async fn serve_status(
    listener: TcpListener,
    engine: Arc<GeofenceEngine>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let engine = engine.clone();
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let engine = engine.clone();
                                let metrics = metrics.clone();
                                async move { handle_request(req, engine, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "status_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "status_accept_error");
                    }
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    info!("status_server_shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Position, UserId, ZoneConfig};
    use crate::services::telemetry::create_telemetry_dispatcher;
    use crate::services::telemetry::test_support::RecordingSink;
    use crate::services::telemetry::TelemetryWorker;
    use chrono::Utc;
    use http_body_util::BodyExt;

    fn test_engine() -> (Arc<GeofenceEngine>, Arc<Metrics>, TelemetryWorker) {
        let metrics = Arc::new(Metrics::new());
        let sink = Arc::new(RecordingSink::default());
        let (dispatcher, worker) = create_telemetry_dispatcher(sink, metrics.clone(), 16);
        let engine = Arc::new(GeofenceEngine::new(
            UserId(7),
            ZoneConfig::circle(34.0, 35.0, 50.0),
            dispatcher,
            metrics.clone(),
        ));
        (engine, metrics, worker)
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let (engine, metrics, _worker) = test_engine();
        engine.on_position(Position::new(34.0, 35.0, Utc::now()));

        let output = format_prometheus_metrics(&metrics, &engine);

        assert!(output.contains("geofence_positions_total{user=\"7\"} 1"));
        assert!(output.contains("geofence_eval_latency_us_bucket{user=\"7\""));
        assert!(output.contains("geofence_zone_assigned{user=\"7\"} 1"));
        assert!(output.contains("geofence_inside_zone{user=\"7\"} 1"));
        assert!(output.contains("geofence_telemetry_queue_depth{user=\"7\"} 1"));
        assert!(output.contains("geofence_transitions_total{user=\"7\",kind=\"exited\"} 0"));
    }

    #[tokio::test]
    async fn test_status_returns_snapshot_json() {
        let (engine, metrics, _worker) = test_engine();
        engine.on_position(Position::new(34.0, 35.0, Utc::now()));

        let response = respond(&Method::GET, "/status", &engine, &metrics);
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["tracking"]["state"], "active");
        assert_eq!(body["status"]["state"], "inside");
        assert_eq!(body["zone"]["kind"], "circle");
        assert_eq!(body["zone"]["radius_meters"], 50.0);
    }

    #[test]
    fn test_restart_endpoint() {
        let (engine, metrics, _worker) = test_engine();

        let response = respond(&Method::POST, "/tracking/restart", &engine, &metrics);
        assert_eq!(response.status(), StatusCode::CONFLICT);

        engine.on_source_failure("permission revoked");
        assert_eq!(engine.snapshot().tracking.as_str(), "unavailable");

        let response = respond(&Method::POST, "/tracking/restart", &engine, &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(engine.snapshot().tracking.as_str(), "waiting");
    }

    #[test]
    fn test_unknown_route() {
        let (engine, metrics, _worker) = test_engine();
        assert_eq!(
            respond(&Method::GET, "/nope", &engine, &metrics).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(respond(&Method::GET, "/health", &engine, &metrics).status(), StatusCode::OK);
    }
}
