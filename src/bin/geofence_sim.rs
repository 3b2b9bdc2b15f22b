//! Geofence simulator - walks a straight line through a zone
//!
//! Connects to the tracker's position listener and emits one fix per step,
//! starting `--start-distance` meters from the zone center on the reverse of
//! `--bearing` and walking through the center to the same distance on the
//! other side. Optional bounded jitter approximates GPS noise.
//!
//! Usage:
//!   cargo run --bin geofence-sim -- --lat 34.0 --lng 35.0 --start-distance 120

use clap::Parser;
use geofence_tracker::services::evaluator::destination_point;
use serde_json::json;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "geofence-sim")]
#[command(about = "Position feed simulator for local testing")]
struct Args {
    /// Position listener address
    #[arg(long, default_value = "127.0.0.1:5870")]
    addr: String,

    /// Zone center latitude
    #[arg(long, default_value = "34.0")]
    lat: f64,

    /// Zone center longitude
    #[arg(long, default_value = "35.0")]
    lng: f64,

    /// Walk direction in degrees from true north
    #[arg(long, default_value = "0.0")]
    bearing: f64,

    /// Distance from center where the walk starts and ends (meters)
    #[arg(long, default_value = "120.0")]
    start_distance: f64,

    /// Step length (meters)
    #[arg(long, default_value = "10.0")]
    step: f64,

    /// Delay between fixes (milliseconds)
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Max jitter added to each fix (meters)
    #[arg(long, default_value = "0.0")]
    jitter: f64,

    /// Reported horizontal accuracy (meters)
    #[arg(long)]
    accuracy: Option<f64>,

    /// Finish with a source failure carrying this reason
    #[arg(long)]
    fail_with: Option<String>,
}

/// Deterministic pseudo-random offset in [-1, 1] (xorshift)
fn next_unit(state: &mut u64) -> f64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    (*state % 20_001) as f64 / 10_000.0 - 1.0
}

/// Fixes along the walk as (latitude, longitude, signed offset from center)
fn walk(args: &Args) -> Vec<(f64, f64, f64)> {
    let step = args.step.max(0.1);
    let steps = (2.0 * args.start_distance / step).ceil() as usize;
    let mut seed = 0x9E37_79B9_7F4A_7C15u64;

    (0..=steps)
        .map(|i| {
            let offset = -args.start_distance + i as f64 * step;
            let (mut lat, mut lng) = if offset < 0.0 {
                destination_point(args.lat, args.lng, args.bearing + 180.0, -offset)
            } else {
                destination_point(args.lat, args.lng, args.bearing, offset)
            };
            if args.jitter > 0.0 {
                let noise = args.jitter * next_unit(&mut seed).abs();
                let direction = 180.0 * (next_unit(&mut seed) + 1.0);
                (lat, lng) = destination_point(lat, lng, direction, noise);
            }
            (lat, lng, offset)
        })
        .collect()
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
    let mut stream = TcpStream::connect(&args.addr).await?;
    info!(addr = %args.addr, "sim_connected");

    let fixes = walk(&args);
    let total = fixes.len();
    for (i, (lat, lng, offset)) in fixes.into_iter().enumerate() {
        let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let mut fix = json!({
            "latitude": lat,
            "longitude": lng,
            "timestamp": timestamp,
        });
        if let Some(accuracy) = args.accuracy {
            fix["accuracy"] = json!(accuracy);
        }

        stream.write_all(format!("{}\n", fix).as_bytes()).await?;
        info!(
            step = %(i + 1),
            total = %total,
            offset_m = format!("{:.1}", offset),
            lat = format!("{:.6}", lat),
            lng = format!("{:.6}", lng),
            "sim_fix_sent"
        );
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    if let Some(reason) = args.fail_with {
        let line = json!({ "unavailable": reason });
        stream.write_all(format!("{}\n", line).as_bytes()).await?;
        info!(reason = %reason, "sim_failure_sent");
    }

    stream.shutdown().await?;
    info!("sim_done");
    Ok(())
}
