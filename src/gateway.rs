//! Conferencing gateway: Google Calendar events with a Meet conference
//! attached, and a synthesized fallback when the provider is unusable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::error::CoreError;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const MOCK_LINK_BASE: &str = "https://meet.google.com/";
const MOCK_ID_PREFIX: &str = "mock-event-";

static MOCK_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("conferencing credentials are not configured")]
    MissingCredentials,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("provider response is missing {0}")]
    MissingField(&'static str),

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub subject: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    /// Attendee e-mail addresses; the provider sends the invites.
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EventUpdate {
    pub subject: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalResource {
    pub join_link: String,
    pub external_id: String,
    /// True when the resource was synthesized instead of provisioned.
    pub degraded: bool,
}

/// A third-party calendar able to host conference-backed events.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn create_event(&self, request: &ProvisionRequest) -> Result<ExternalResource, GatewayError>;
    async fn patch_event(&self, external_id: &str, update: &EventUpdate) -> Result<(), GatewayError>;
    async fn delete_event(&self, external_id: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

pub struct GoogleCalendarProvider {
    http: reqwest::Client,
    credentials: GoogleCredentials,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: Option<String>,
    hangout_link: Option<String>,
}

fn event_window(start: DateTime<Utc>, duration_minutes: u32) -> (Value, Value) {
    let end = start + ChronoDuration::minutes(i64::from(duration_minutes));
    (
        json!({ "dateTime": start.to_rfc3339(), "timeZone": "UTC" }),
        json!({ "dateTime": end.to_rfc3339(), "timeZone": "UTC" }),
    )
}

/// Calendar v3 event body with a Meet conference request and reminders one
/// day and thirty minutes ahead.
pub(crate) fn event_body(request: &ProvisionRequest) -> Value {
    let (start, end) = event_window(request.start, request.duration_minutes);
    json!({
        "summary": request.subject,
        "description": request
            .description
            .clone()
            .unwrap_or_else(|| "Peer-to-Peer Learning Session".to_string()),
        "start": start,
        "end": end,
        "attendees": request
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect::<Vec<_>>(),
        "conferenceData": {
            "createRequest": {
                "requestId": format!("meet-{}", Uuid::new_v4()),
                "conferenceSolutionKey": { "type": "hangoutsMeet" }
            }
        },
        "reminders": {
            "useDefault": false,
            "overrides": [
                { "method": "email", "minutes": 24 * 60 },
                { "method": "popup", "minutes": 30 }
            ]
        }
    })
}

fn patch_body(update: &EventUpdate) -> Value {
    let (start, end) = event_window(update.start, update.duration_minutes);
    json!({
        "summary": update.subject,
        "description": update.description,
        "start": start,
        "end": end,
    })
}

impl GoogleCalendarProvider {
    pub fn new(credentials: GoogleCredentials) -> Self {
        GoogleCalendarProvider {
            http: reqwest::Client::new(),
            credentials,
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let token: TokenResponse = check(resp).await?.json().await?;
        Ok(token.access_token)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GatewayError::Provider { status: status.as_u16(), body })
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    async fn create_event(&self, request: &ProvisionRequest) -> Result<ExternalResource, GatewayError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(EVENTS_URL)
            .query(&[("conferenceDataVersion", "1"), ("sendUpdates", "all")])
            .bearer_auth(token)
            .json(&event_body(request))
            .send()
            .await?;
        let event: EventResponse = check(resp).await?.json().await?;
        Ok(ExternalResource {
            join_link: event.hangout_link.ok_or(GatewayError::MissingField("hangoutLink"))?,
            external_id: event.id.ok_or(GatewayError::MissingField("id"))?,
            degraded: false,
        })
    }

    async fn patch_event(&self, external_id: &str, update: &EventUpdate) -> Result<(), GatewayError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .patch(format!("{EVENTS_URL}/{external_id}"))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token)
            .json(&patch_body(update))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn delete_event(&self, external_id: &str) -> Result<(), GatewayError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .delete(format!("{EVENTS_URL}/{external_id}"))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

/// Front of the conferencing provider used by the coordinator.
///
/// `provision` never fails: without a provider, on error, or on timeout it
/// hands out a synthesized link and id that are unique within the process.
pub struct ConferencingGateway {
    provider: Option<Arc<dyn CalendarProvider>>,
    timeout: Duration,
}

impl ConferencingGateway {
    pub fn new(provider: Option<Arc<dyn CalendarProvider>>, timeout: Duration) -> Self {
        ConferencingGateway { provider, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        let provider = config.google_credentials.clone().map(|creds| {
            info!("Google Calendar provider configured for client {}", creds.client_id);
            Arc::new(GoogleCalendarProvider::new(creds)) as Arc<dyn CalendarProvider>
        });
        if provider.is_none() {
            warn!("Google API credentials missing; meetings will get placeholder links");
        }
        Self::new(provider, config.gateway_timeout)
    }

    pub fn is_mock_id(external_id: &str) -> bool {
        external_id.starts_with(MOCK_ID_PREFIX)
    }

    fn mock_resource() -> ExternalResource {
        let millis = Utc::now().timestamp_millis();
        let seq = MOCK_SEQ.fetch_add(1, Ordering::Relaxed);
        ExternalResource {
            join_link: format!("{MOCK_LINK_BASE}mock-{millis}-{seq}"),
            external_id: format!("{MOCK_ID_PREFIX}{millis}-{seq}"),
            degraded: true,
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }

    pub async fn provision(&self, request: &ProvisionRequest) -> ExternalResource {
        let outcome = match &self.provider {
            Some(provider) => self.bounded(provider.create_event(request)).await,
            None => Err(GatewayError::MissingCredentials),
        };
        match outcome {
            Ok(resource) => resource,
            Err(e) => {
                let resource = Self::mock_resource();
                warn!(
                    "{}; using {} for \"{}\"",
                    CoreError::ExternalDegraded(e.to_string()),
                    resource.join_link,
                    request.subject
                );
                resource
            }
        }
    }

    pub async fn reschedule(&self, external_id: &str, update: &EventUpdate) -> Result<(), GatewayError> {
        if Self::is_mock_id(external_id) {
            return Ok(());
        }
        let provider = self.provider.as_ref().ok_or(GatewayError::MissingCredentials)?;
        self.bounded(provider.patch_event(external_id, update)).await
    }

    pub async fn cancel(&self, external_id: &str) -> Result<(), GatewayError> {
        if Self::is_mock_id(external_id) {
            return Ok(());
        }
        let provider = self.provider.as_ref().ok_or(GatewayError::MissingCredentials)?;
        self.bounded(provider.delete_event(external_id)).await
    }
}
