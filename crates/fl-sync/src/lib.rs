//! Backend synchronization for fleetlog.
//!
//! Uploads locally recorded events to the backend REST API:
//! - `POST /api/workday-events` for work, break and absence events
//! - `PUT /api/workday-events/{id}` for workday events rewritten after upload
//! - `POST /api/refuel-events`
//! - `POST /api/loading-events`
//!
//! Local state is authoritative. A failed upload never touches the store; the
//! event simply stays unsynced and is retried.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use fl_core::{Event, EventType, RemoteId, UserId};
use fl_db::{Database, DbError};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default request timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The provided token was invalid.
    #[error("invalid API token: {reason}")]
    InvalidToken { reason: &'static str },
    /// The configured base URL is unusable.
    #[error("invalid API URL: {0}")]
    InvalidUrl(String),
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed before a response arrived.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The backend rejected the credentials.
    #[error("not authorized (status {status}); check the API token")]
    Unauthorized { status: u16 },
    /// The backend answered with a non-success status.
    #[error("API error: status {status}: {body}")]
    Status { status: u16, body: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Reading or updating the local store failed.
    #[error(transparent)]
    Store(#[from] DbError),
}

impl SyncError {
    /// Whether trying again later may succeed.
    ///
    /// Transport failures, server errors, timeouts and rate limiting are
    /// retryable. Authentication failures and other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => {
                *status >= 500
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            _ => false,
        }
    }
}

/// Backend API client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is blank, the URL is not http(s), or
    /// the HTTP client fails to build.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, SyncError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SyncError::InvalidToken {
                reason: "API token cannot be empty",
            });
        }

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SyncError::InvalidUrl(base_url));
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(SyncError::ClientBuild)?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// Uploads one event.
    ///
    /// Returns the backend id when the response carries one.
    pub async fn push(&self, event: &Event) -> Result<Option<RemoteId>, SyncError> {
        let route = Route::for_event(event);
        let payload = EventPayload::from(event);

        let response = self
            .http
            .request(route.method.clone(), format!("{}{}", self.base_url, route.path))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_remote_id(&body)
    }
}

/// Where an event is uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    /// Chooses the endpoint for an event.
    ///
    /// Workday events that already have a backend id are updated in place;
    /// everything else is created.
    pub fn for_event(event: &Event) -> Self {
        let event_type = event.data.event_type;
        match event_type {
            EventType::Refuel => Self::post("/api/refuel-events"),
            EventType::LoadingStart | EventType::LoadingEnd => Self::post("/api/loading-events"),
            _ => match &event.remote_id {
                Some(remote_id) => Self {
                    method: Method::PUT,
                    path: format!("/api/workday-events/{remote_id}"),
                },
                None => Self::post("/api/workday-events"),
            },
        }
    }

    fn post(path: &str) -> Self {
        Self {
            method: Method::POST,
            path: path.to_string(),
        }
    }
}

/// Wire body for every endpoint. Fields that do not apply are omitted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload<'a> {
    client_id: &'a str,
    user_id: &'a UserId,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    odometer: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fuel_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fuel_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    until: Option<NaiveDate>,
}

impl<'a> From<&'a Event> for EventPayload<'a> {
    fn from(event: &'a Event) -> Self {
        let data = &event.data;
        let location = data.location.as_ref();
        let refuel = data.refuel.as_ref();
        Self {
            client_id: &data.client_id,
            user_id: &data.user_id,
            event_type: data.event_type.as_str().to_uppercase(),
            timestamp: format_timestamp(data.timestamp),
            odometer: data.odometer_km,
            latitude: location.map(|l| l.latitude),
            longitude: location.map(|l| l.longitude),
            address: location.and_then(|l| l.address.as_deref()),
            fuel_type: refuel.map(|r| r.fuel_type.as_str()),
            fuel_amount: refuel.map(|r| r.litres),
            payment_method: refuel.map(|r| r.payment_method.as_str().to_uppercase()),
            until: data.until,
        }
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_remote_id(body: &str) -> Result<Option<RemoteId>, SyncError> {
    #[derive(Deserialize)]
    struct Created {
        #[serde(default)]
        id: Option<serde_json::Value>,
    }

    if body.trim().is_empty() {
        return Ok(None);
    }
    let created: Created =
        serde_json::from_str(body).map_err(|err| SyncError::InvalidResponse(err.to_string()))?;
    let id = match created.id {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(id)) => id,
        Some(serde_json::Value::Number(id)) => id.to_string(),
        Some(other) => {
            return Err(SyncError::InvalidResponse(format!(
                "unexpected id type: {other}"
            )));
        }
    };
    RemoteId::new(id)
        .map(Some)
        .map_err(|err| SyncError::InvalidResponse(err.to_string()))
}

/// Exponential backoff for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per event, including the first.
    /// Default: 5.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles after each failure.
    /// Default: 500 ms.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), capped at one minute.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }
}

/// Uploads one event, retrying retryable failures with backoff.
pub async fn push_with_retry(
    client: &Client,
    event: &Event,
    policy: &RetryPolicy,
) -> Result<Option<RemoteId>, SyncError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.push(event).await {
            Ok(remote_id) => return Ok(remote_id),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    id = event.id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "upload failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Outcome of a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub failed: usize,
}

/// Uploads every unsynced event of a user, oldest first.
///
/// Events that still fail after retries stay unsynced and are counted in
/// [`SyncReport::failed`]. An authentication failure stops the pass and is
/// returned as an error.
pub async fn sync_pending(
    db: &mut Database,
    client: &Client,
    policy: &RetryPolicy,
    user_id: Option<&UserId>,
) -> Result<SyncReport, SyncError> {
    let pending = db.list_unsynced(user_id)?;
    let mut report = SyncReport::default();

    for event in &pending {
        match push_with_retry(client, event, policy).await {
            Ok(remote_id) => {
                if !db.mark_synced(event, remote_id.as_ref())? {
                    tracing::info!(id = event.id, "event changed during upload, left pending");
                }
                report.uploaded += 1;
            }
            Err(err @ SyncError::Unauthorized { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(id = event.id, error = %err, "giving up on event for this pass");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        uploaded = report.uploaded,
        failed = report.failed,
        "sync pass finished"
    );
    Ok(report)
}
