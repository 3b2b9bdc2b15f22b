//! Mock backend HTTP server
//!
//! Implements the three backend routes the tracker talks to:
//! - `GET  /api/users/{userId}` - user record with the configured zone
//! - `POST /api/user-location` - logged and acknowledged
//! - `POST /api/alerts` - logged and acknowledged
//!
//! `--string-numbers` serves zone fields as JSON strings, the way some
//! backend versions do. `--fail-every N` answers every Nth request with 503.
//!
//! Usage:
//!   cargo run --bin mock-backend -- --port 8080 --lat 34.0 --lng 35.0 --radius 50

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock-backend")]
#[command(about = "Mock geofence backend for local simulation")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Zone center latitude (omit all three zone flags for no zone)
    #[arg(long)]
    lat: Option<f64>,

    /// Zone center longitude
    #[arg(long)]
    lng: Option<f64>,

    /// Zone radius in meters
    #[arg(long)]
    radius: Option<f64>,

    /// Serve numeric zone fields as strings
    #[arg(long)]
    string_numbers: bool,

    /// Answer every Nth request with 503 (0 disables)
    #[arg(long, default_value = "0")]
    fail_every: u64,
}

struct MockState {
    args: Args,
    requests: AtomicU64,
    locations: AtomicU64,
    alerts: AtomicU64,
}

impl MockState {
    fn zone_field(&self, value: Option<f64>) -> Value {
        match value {
            Some(v) if self.args.string_numbers => json!(v.to_string()),
            Some(v) => json!(v),
            None => Value::Null,
        }
    }

    fn user_record(&self, user_id: &str) -> Value {
        let id: Value = user_id.parse::<i64>().map(Value::from).unwrap_or(Value::Null);
        json!({
            "id": id,
            "name": format!("user-{}", user_id),
            "zone_center_lat": self.zone_field(self.args.lat),
            "zone_center_lng": self.zone_field(self.args.lng),
            "zone_radius_m": self.zone_field(self.args.radius),
        })
    }

    fn should_fail(&self) -> bool {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.args.fail_every > 0 && n % self.args.fail_every == 0
    }
}

fn response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

async fn read_json(req: Request<hyper::body::Incoming>) -> Option<Value> {
    let bytes = req.into_body().collect().await.ok()?.to_bytes();
    serde_json::from_slice(&bytes).ok()
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<MockState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if state.should_fail() {
        warn!(method = %method, path = %path, "mock_injected_failure");
        return Ok(response(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "injected"})));
    }

    let reply = match (&method, path.as_str()) {
        (&Method::GET, p) if p.starts_with("/api/users/") => {
            let user_id = &p["/api/users/".len()..];
            let record = state.user_record(user_id);
            info!(user_id = %user_id, record = %record, "mock_user_record_served");
            response(StatusCode::OK, record)
        }
        (&Method::POST, "/api/user-location") => match read_json(req).await {
            Some(body) => {
                let n = state.locations.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    n = %n,
                    user_id = %body["userId"],
                    latitude = %body["latitude"],
                    longitude = %body["longitude"],
                    inside_zone = %body["insideZone"],
                    "mock_location_received"
                );
                response(StatusCode::OK, json!({"ok": true}))
            }
            None => response(StatusCode::BAD_REQUEST, json!({"error": "invalid json"})),
        },
        (&Method::POST, "/api/alerts") => match read_json(req).await {
            Some(body) => {
                let n = state.alerts.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    n = %n,
                    user_id = %body["userId"],
                    alert_type = %body["alertType"],
                    latitude = %body["latitude"],
                    longitude = %body["longitude"],
                    "mock_alert_received"
                );
                response(StatusCode::CREATED, json!({"ok": true}))
            }
            None => response(StatusCode::BAD_REQUEST, json!({"error": "invalid json"})),
        },
        _ => response(StatusCode::NOT_FOUND, json!({"error": "not found"})),
    };

    Ok(reply)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        port = %args.port,
        lat = ?args.lat,
        lng = ?args.lng,
        radius = ?args.radius,
        string_numbers = %args.string_numbers,
        fail_every = %args.fail_every,
        "mock_backend_started"
    );

    let state = Arc::new(MockState {
        args,
        requests: AtomicU64::new(0),
        locations: AtomicU64::new(0),
        alerts: AtomicU64::new(0),
    });

    loop {
        let (stream, _peer) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await
            {
                error!(error = %e, "mock_http_error");
            }
        });
    }
}
