use axum::{
    Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use services::services::google::{
    CalendarEvent, CreateCalendarEvent, DriveFile, GoogleApiError, UpdateCalendarEvent,
};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub const GOOGLE_TOKEN_HEADER: &str = "x-google-access-token";

fn google_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(GOOGLE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Google(GoogleApiError::Unauthorized))
}

fn calendar_enabled(state: &AppState) -> Result<(), ApiError> {
    if state.config().features.calendar {
        Ok(())
    } else {
        Err(ApiError::Unavailable("calendar"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWindow {
    pub time_min: Option<DateTime<Utc>>,
    pub time_max: Option<DateTime<Utc>>,
}

pub async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(window): Query<EventWindow>,
) -> Result<ResponseJson<ApiResponse<Vec<CalendarEvent>>>, ApiError> {
    calendar_enabled(&state)?;
    let token = google_token(&headers)?;
    let time_min = window.time_min.or_else(|| Some(Utc::now()));
    let events = state.google().list_events(token, time_min, window.time_max).await?;
    Ok(ResponseJson(ApiResponse::success(events)))
}

pub async fn create_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(payload): axum::Json<CreateCalendarEvent>,
) -> Result<ResponseJson<ApiResponse<CalendarEvent>>, ApiError> {
    calendar_enabled(&state)?;
    if payload.summary.trim().is_empty() {
        return Err(ApiError::BadRequest("summary must not be empty".to_string()));
    }
    let event = state.google().create_event(google_token(&headers)?, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn update_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
    axum::Json(payload): axum::Json<UpdateCalendarEvent>,
) -> Result<ResponseJson<ApiResponse<CalendarEvent>>, ApiError> {
    calendar_enabled(&state)?;
    let event = state
        .google()
        .update_event(google_token(&headers)?, &event_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn delete_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    calendar_enabled(&state)?;
    state.google().delete_event(google_token(&headers)?, &event_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveQuery {
    pub page_size: Option<u32>,
}

pub async fn list_drive_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DriveQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<DriveFile>>>, ApiError> {
    let token = google_token(&headers)?;
    let files = state
        .google()
        .list_drive_files(token, query.page_size.unwrap_or(20))
        .await?;
    Ok(ResponseJson(ApiResponse::success(files)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .nest(
            "/calendar/events",
            Router::new()
                .route("/", get(list_events).post(create_event))
                .route(
                    "/{event_id}",
                    axum::routing::put(update_event)
                        .patch(update_event)
                        .delete(delete_event),
                ),
        )
        .route("/drive/files", get(list_drive_files))
}
