//! Backend HTTP client
//!
//! Endpoints:
//! - `GET  /api/users/{userId}` - authoritative user record (zone fields)
//! - `POST /api/user-location` - latest position + inside/outside/unknown
//! - `POST /api/alerts` - exit alert
//!
//! Responses to the two POSTs are ignored beyond transport success and status.

use crate::domain::types::{Position, TransitionEvent, UserId, ZoneConfig, ZoneStatus};
use crate::domain::zone_record::{decode_zone, DecodeError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Body of `POST /api/user-location`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub user_id: UserId,
    pub latitude: f64,
    pub longitude: f64,
    /// `null` when no zone is configured
    pub inside_zone: Option<bool>,
}

impl LocationReport {
    pub fn new(user_id: UserId, position: &Position, status: &ZoneStatus) -> Self {
        Self {
            user_id,
            latitude: position.latitude,
            longitude: position.longitude,
            inside_zone: status.inside_zone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Exit,
}

/// Body of `POST /api/alerts`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReport {
    pub user_id: UserId,
    pub alert_type: AlertType,
    pub latitude: f64,
    pub longitude: f64,
}

impl AlertReport {
    pub fn exit(user_id: UserId, event: &TransitionEvent) -> Self {
        Self {
            user_id,
            alert_type: AlertType::Exit,
            latitude: event.at_position.latitude,
            longitude: event.at_position.longitude,
        }
    }
}

/// Authoritative source of a user's zone
#[async_trait]
pub trait ZoneSource: Send + Sync {
    async fn fetch_zone(&self, user_id: UserId) -> Result<ZoneConfig, BackendError>;
}

/// Destination for location reports and alerts
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send_location(&self, report: &LocationReport) -> Result<(), BackendError>;
    async fn send_alert(&self, alert: &AlertReport) -> Result<(), BackendError>;
}

pub struct BackendClient {
    base_url: String,
    // Created once for reuse (connection pooling)
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn user_url(&self, user_id: UserId) -> String {
        format!("{}/api/users/{}", self.base_url, user_id)
    }

    fn location_url(&self) -> String {
        format!("{}/api/user-location", self.base_url)
    }

    fn alerts_url(&self) -> String {
        format!("{}/api/alerts", self.base_url)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: String, body: &T) -> Result<(), BackendError> {
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        debug!(url = %url, status = %status.as_u16(), "backend_post_ok");
        Ok(())
    }
}

#[async_trait]
impl ZoneSource for BackendClient {
    async fn fetch_zone(&self, user_id: UserId) -> Result<ZoneConfig, BackendError> {
        let response = self.http.get(self.user_url(user_id)).send().await?;
        // Only 200 carries a usable record; anything else means "no change"
        if response.status() != StatusCode::OK {
            return Err(BackendError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        Ok(decode_zone(&body, user_id)?)
    }
}

#[async_trait]
impl TelemetrySink for BackendClient {
    async fn send_location(&self, report: &LocationReport) -> Result<(), BackendError> {
        self.post_json(self.location_url(), report).await
    }

    async fn send_alert(&self, alert: &AlertReport) -> Result<(), BackendError> {
        self.post_json(self.alerts_url(), alert).await
    }
}
