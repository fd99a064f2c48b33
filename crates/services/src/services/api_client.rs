//! Typed client for the GoalFlow HTTP API. Every failure, including an elapsed
//! timeout, comes back as one [`ApiError`] carrying an HTTP-style status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use ts_rs::TS;
use utils::response::ApiResponse;

use super::{
    config::Config,
    google::{CalendarEvent, CreateCalendarEvent, DriveFile, UpdateCalendarEvent},
};

pub const TIMEOUT_STATUS: u16 = 408;

/// Where a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The server answered with an error.
    Response,
    /// Our own deadline elapsed before an answer arrived.
    Timeout,
    /// No answer at all.
    Transport,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} (status {status})")]
pub struct ApiError {
    pub message: String,
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
    pub payload: Option<Value>,
    pub kind: ApiErrorKind,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status: u16, payload: Option<Value>) -> Self {
        Self {
            message: message.into(),
            status,
            payload,
            kind: ApiErrorKind::Response,
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: ApiErrorKind::Timeout,
            ..Self::new("Request timeout", TIMEOUT_STATUS, None)
        }
    }

    /// True only when the client gave up waiting, not for a 408 the server sent.
    pub fn is_timeout(&self) -> bool {
        self.kind == ApiErrorKind::Timeout
    }

    fn transport(e: reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Transport,
            ..Self::new(e.to_string(), 0, None)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub database: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub session_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    id_token: Option<String>,
    google_access_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("goalflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::transport)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            id_token: None,
            google_access_token: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(config.api_base_url.clone(), config.api_timeout)
    }

    /// Identity token sent as the bearer credential.
    pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
        self.id_token = Some(token.into());
        self
    }

    pub fn with_google_access_token(mut self, token: impl Into<String>) -> Self {
        self.google_access_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request and decode a 2xx JSON body as `T`. The whole exchange,
    /// body included, must finish within the client timeout; otherwise the
    /// request is dropped and a 408 error returned.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut builder = self.http.request(method.clone(), self.url(path));
        if let Some(token) = &self.id_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(token) = &self.google_access_token {
            builder = builder.header("x-google-access-token", token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let exchange = async {
            let res = builder.send().await.map_err(ApiError::transport)?;
            let status = res.status();
            let text = res.text().await.map_err(ApiError::transport)?;
            Ok::<_, ApiError>((status, text))
        };
        let (status, text) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                debug!(%method, path, "api request timed out");
                ApiError::timeout()
            })??;

        let payload = serde_json::from_str::<Value>(&text).ok();
        if !status.is_success() {
            let message = payload
                .as_ref()
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
            let payload = payload.or_else(|| (!text.is_empty()).then(|| Value::String(text)));
            return Err(ApiError::new(message, status.as_u16(), payload));
        }

        serde_json::from_str(&text).map_err(|e| {
            ApiError::new(format!("Invalid response body: {e}"), status.as_u16(), payload)
        })
    }

    /// Unwrap the `ApiResponse` envelope the server answers with.
    async fn data<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let envelope: ApiResponse<T> = self.request(method, path, body).await?;
        ensure_success(&envelope)?;
        envelope
            .into_data()
            .ok_or_else(|| ApiError::new("Response carried no data", 200, None))
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.data(Method::GET, "health", None::<&()>).await
    }

    pub async fn auth_status(&self) -> Result<AuthStatus, ApiError> {
        self.data(Method::GET, "auth/status", None::<&()>).await
    }

    pub async fn calendar_events(
        &self,
        time_min: Option<DateTime<Utc>>,
        time_max: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, ApiError> {
        let mut query = Vec::new();
        if let Some(t) = time_min {
            query.push(format!("timeMin={}", urlencode(&t.to_rfc3339())));
        }
        if let Some(t) = time_max {
            query.push(format!("timeMax={}", urlencode(&t.to_rfc3339())));
        }
        let path = if query.is_empty() {
            "calendar/events".to_string()
        } else {
            format!("calendar/events?{}", query.join("&"))
        };
        self.data(Method::GET, &path, None::<&()>).await
    }

    pub async fn create_calendar_event(
        &self,
        event: &CreateCalendarEvent,
    ) -> Result<CalendarEvent, ApiError> {
        self.data(Method::POST, "calendar/events", Some(event)).await
    }

    pub async fn update_calendar_event(
        &self,
        event_id: &str,
        update: &UpdateCalendarEvent,
    ) -> Result<CalendarEvent, ApiError> {
        self.data(Method::PUT, &format!("calendar/events/{}", urlencode(event_id)), Some(update))
            .await
    }

    pub async fn delete_calendar_event(&self, event_id: &str) -> Result<(), ApiError> {
        let envelope: ApiResponse<Value> = self
            .request(
                Method::DELETE,
                &format!("calendar/events/{}", urlencode(event_id)),
                None::<&()>,
            )
            .await?;
        ensure_success(&envelope)
    }

    pub async fn drive_files(&self) -> Result<Vec<DriveFile>, ApiError> {
        self.data(Method::GET, "drive/files", None::<&()>).await
    }
}

fn ensure_success<T>(envelope: &ApiResponse<T>) -> Result<(), ApiError> {
    if envelope.is_success() {
        Ok(())
    } else {
        Err(ApiError::new(
            envelope.message().unwrap_or("Request failed"),
            200,
            None,
        ))
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
