//! Geofence tracker daemon
//!
//! Consumes position fixes from the position feed, classifies each against the
//! logged-in user's zone, reports every position to the backend and raises an
//! exit alert once per departure.
//!
//! Module structure:
//! - `domain/` - Core types (Position, ZoneConfig, ZoneStatus, user record)
//! - `io/` - External interfaces (backend HTTP, position feed, status endpoint)
//! - `services/` - Business logic (evaluator, transitions, telemetry, zone sync, engine)
//! - `infra/` - Infrastructure (Config, Metrics, Session)

use anyhow::Context;
use clap::Parser;
use geofence_tracker::domain::{UserId, ZoneConfig};
use geofence_tracker::infra::{Config, Metrics, Session, SessionStore};
use geofence_tracker::io::{
    start_position_listener, start_status_server, BackendClient, PositionListenerConfig,
    ZoneSource,
};
use geofence_tracker::services::{spawn_engine, EngineOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence tracker - zone entry/exit monitoring for one user
#[derive(Parser, Debug)]
#[command(name = "geofence-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Log in as this user (replaces any stored session)
    #[arg(long)]
    user_id: Option<i64>,

    /// Clear the stored session and exit
    #[arg(long)]
    logout: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "geofence-tracker starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        backend_url = %config.backend_url(),
        sync_interval_secs = %config.sync_interval().as_secs(),
        position_port = %config.position_listener_port(),
        http_port = %config.http_port(),
        session_file = %config.session_file(),
        "config_loaded"
    );

    let store = SessionStore::new(config.session_file());

    if args.logout {
        store.clear().context("failed to clear session")?;
        info!("logged_out");
        return Ok(());
    }

    let backend = Arc::new(
        BackendClient::new(config.backend_url(), config.backend_timeout())
            .context("failed to build backend client")?,
    );

    let session = match args.user_id {
        Some(id) => login(&store, backend.as_ref(), UserId(id)).await?,
        None => match store.load().context("failed to load session")? {
            Some(session) => session,
            None => {
                // Tracking never starts without an authenticated identity
                warn!(path = %store.path().display(), "no_session: log in with --user-id");
                return Ok(());
            }
        },
    };

    info!(
        user_id = %session.user_id,
        zone_assigned = %session.zone.is_assigned(),
        "session_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let (position_tx, position_rx) = mpsc::channel(config.position_channel_size());

    let options = EngineOptions {
        sync_interval: config.sync_interval(),
        telemetry_queue_size: config.telemetry_queue_size(),
    };
    let handle = spawn_engine(
        session.user_id,
        session.zone,
        backend.clone(),
        backend,
        position_rx,
        options,
        metrics.clone(),
    );

    // Shutdown for the listener, status server and reporters
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start position TCP listener
    let listener_config = PositionListenerConfig {
        port: config.position_listener_port(),
        enabled: config.position_listener_enabled(),
    };
    let listener_metrics = metrics.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            start_position_listener(listener_config, position_tx, listener_metrics, listener_shutdown)
                .await
        {
            error!(error = %e, "position listener error");
        }
    });

    // Start status HTTP server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let engine = handle.engine().clone();
        let status_metrics = metrics.clone();
        let status_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_status_server(http_port, engine, status_metrics, status_shutdown).await
            {
                error!(error = %e, "status server error");
            }
        });
    }

    // Keep the stored zone snapshot current so a restart begins from it
    let mut status_rx = handle.engine().subscribe();
    let mut persist_shutdown = shutdown_rx.clone();
    let persist_store = SessionStore::new(config.session_file());
    let user_id = session.user_id;
    tokio::spawn(async move {
        let mut saved_zone = session.zone;
        loop {
            tokio::select! {
                res = status_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                    let zone = status_rx.borrow_and_update().zone;
                    if zone != saved_zone {
                        saved_zone = zone;
                        if let Err(e) = persist_store.save_blocking(Session { user_id, zone }).await {
                            warn!(error = %e, "session_zone_save_failed");
                        }
                    }
                }
                _ = persist_shutdown.changed() => {
                    if *persist_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut reporter_shutdown = shutdown_rx;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = reporter_shutdown.changed() => {
                    if *reporter_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown_signal_received");

    let _ = shutdown_tx.send(true);
    handle.shutdown().await;

    info!("geofence-tracker shutdown complete");
    Ok(())
}

/// Establish a session for `user_id`, seeding it with the backend's zone when
/// reachable
async fn login(
    store: &SessionStore,
    backend: &BackendClient,
    user_id: UserId,
) -> anyhow::Result<Session> {
    let zone = match backend.fetch_zone(user_id).await {
        Ok(zone) => zone,
        Err(e) => {
            // Resync picks the zone up once the backend is reachable
            warn!(user_id = %user_id, error = %e, "login_zone_fetch_failed");
            ZoneConfig::None
        }
    };

    let session = Session { user_id, zone };
    store.save(&session).context("failed to save session")?;
    info!(user_id = %user_id, zone_assigned = %zone.is_assigned(), "logged_in");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_config_path_falls_back_to_env() {
        let command = Args::command();
        let config = command.get_arguments().find(|a| a.get_id() == "config").unwrap();
        assert_eq!(config.get_env(), Some(std::ffi::OsStr::new("CONFIG_FILE")));
    }

    #[test]
    fn test_config_path_flag() {
        let args = Args::try_parse_from(["geofence-tracker", "--config", "config/prod.toml"]).unwrap();
        assert_eq!(args.config, "config/prod.toml");
        assert!(!args.logout);
    }
}
