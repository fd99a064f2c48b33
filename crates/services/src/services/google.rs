//! Google Calendar and Drive REST clients, authenticated with the user's
//! OAuth access token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;
use ts_rs::TS;
use url::Url;

const CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";
const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_FILE_FIELDS: &str = "files(id,name,mimeType,modifiedTime,webViewLink)";

#[derive(Debug, Clone, Error)]
pub enum GoogleApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("google access token rejected")]
    Unauthorized,
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("json error: {0}")]
    Serde(String),
    #[error("invalid url: {0}")]
    Url(String),
}

impl GoogleApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Start or end of an event: `dateTime` for timed events, `date`
/// (`YYYY-MM-DD`) for all-day ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub time_zone: Option<String>,
}

impl EventDateTime {
    pub fn at(date_time: DateTime<Utc>) -> Self {
        Self {
            date_time: Some(date_time),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(default)]
    pub html_link: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CreateCalendarEvent {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub description: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
}

/// Fields to patch; absent fields stay as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub start: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub end: Option<EventDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    message: String,
}

#[derive(Debug, Clone)]
pub struct GoogleClient {
    http: Client,
    calendar_base: String,
    drive_base: String,
}

impl GoogleClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<Self, GoogleApiError> {
        Self::with_base_urls(CALENDAR_API_URL, DRIVE_API_URL)
    }

    pub fn with_base_urls(calendar_base: &str, drive_base: &str) -> Result<Self, GoogleApiError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("goalflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GoogleApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            calendar_base: calendar_base.trim_end_matches('/').to_string(),
            drive_base: drive_base.trim_end_matches('/').to_string(),
        })
    }

    fn events_url(&self, event_id: Option<&str>) -> Result<Url, GoogleApiError> {
        let mut url = Url::parse(&format!("{}/calendars/primary/events", self.calendar_base))
            .map_err(|e| GoogleApiError::Url(e.to_string()))?;
        if let Some(event_id) = event_id {
            url.path_segments_mut()
                .map_err(|_| GoogleApiError::Url("base url cannot have path segments".to_string()))?
                .push(event_id);
        }
        Ok(url)
    }

    fn authorized(&self, method: Method, url: Url, access_token: &str) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(access_token)
    }

    /// Upcoming single events of the primary calendar, ordered by start time.
    pub async fn list_events(
        &self,
        access_token: &str,
        time_min: Option<DateTime<Utc>>,
        time_max: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, GoogleApiError> {
        let mut url = self.events_url(None)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("singleEvents", "true");
            query.append_pair("orderBy", "startTime");
            if let Some(time_min) = time_min {
                query.append_pair("timeMin", &time_min.to_rfc3339());
            }
            if let Some(time_max) = time_max {
                query.append_pair("timeMax", &time_max.to_rfc3339());
            }
        }
        let list: EventList = send_json(self.authorized(Method::GET, url, access_token)).await?;
        debug!(count = list.items.len(), "fetched calendar events");
        Ok(list.items)
    }

    pub async fn create_event(
        &self,
        access_token: &str,
        event: &CreateCalendarEvent,
    ) -> Result<CalendarEvent, GoogleApiError> {
        let url = self.events_url(None)?;
        send_json(self.authorized(Method::POST, url, access_token).json(event)).await
    }

    pub async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        update: &UpdateCalendarEvent,
    ) -> Result<CalendarEvent, GoogleApiError> {
        let url = self.events_url(Some(event_id))?;
        send_json(self.authorized(Method::PATCH, url, access_token).json(update)).await
    }

    pub async fn delete_event(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<(), GoogleApiError> {
        let url = self.events_url(Some(event_id))?;
        let res = self
            .authorized(Method::DELETE, url, access_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(res).await.map(|_| ())
    }

    pub async fn list_drive_files(
        &self,
        access_token: &str,
        page_size: u32,
    ) -> Result<Vec<DriveFile>, GoogleApiError> {
        let mut url = Url::parse(&format!("{}/files", self.drive_base))
            .map_err(|e| GoogleApiError::Url(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("pageSize", &page_size.clamp(1, 100).to_string())
            .append_pair("fields", DRIVE_FILE_FIELDS);
        let list: FileList = send_json(self.authorized(Method::GET, url, access_token)).await?;
        Ok(list.files)
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GoogleApiError> {
    let res = request.send().await.map_err(map_reqwest_error)?;
    check_status(res)
        .await?
        .json::<T>()
        .await
        .map_err(|e| GoogleApiError::Serde(e.to_string()))
}

async fn check_status(res: Response) -> Result<Response, GoogleApiError> {
    match res.status() {
        s if s.is_success() => Ok(res),
        StatusCode::UNAUTHORIZED => Err(GoogleApiError::Unauthorized),
        s => {
            let status = s.as_u16();
            let body = res.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GoogleErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            Err(GoogleApiError::Http { status, message })
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GoogleApiError {
    if e.is_timeout() {
        GoogleApiError::Timeout
    } else {
        GoogleApiError::Transport(e.to_string())
    }
}
