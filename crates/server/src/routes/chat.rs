use axum::{
    Extension, Router,
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::post,
};
use chrono::Utc;
use serde_json::Value;
use services::services::{
    coach::{ChatRequest, Coach, CoachError, CoachSuggestions, summarize_state},
    state::GoalState,
};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::AuthUser};

fn coach(state: &AppState, request: &ChatRequest) -> Result<Coach, ApiError> {
    if request.query.trim().is_empty() {
        return Err(CoachError::EmptyQuery.into());
    }
    state
        .coach()
        .cloned()
        .ok_or_else(|| CoachError::NotConfigured.into())
}

/// Fill in a summary of the user's goals when the client sent no context.
async fn with_context(
    state: &AppState,
    user: &AuthUser,
    mut request: ChatRequest,
) -> Result<ChatRequest, ApiError> {
    if request.context.as_ref().is_none_or(Value::is_null) {
        let goal_state = GoalState {
            goals: state.goals().list_goals(&user.user_id).await?,
            tasks: state.goals().list_tasks(&user.user_id).await?,
            loading: false,
            error: None,
        };
        request.context = Some(Value::String(summarize_state(&goal_state, Utc::now())));
    }
    Ok(request)
}

/// POST /api/chat
/// Streams the coach's answer as plain text
pub async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    axum::Json(payload): axum::Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let coach = coach(&state, &payload)?;
    let request = with_context(&state, &user, payload).await?;
    let reply = coach.stream_reply(&request).await?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(reply),
    )
        .into_response())
}

pub async fn suggestions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    axum::Json(payload): axum::Json<ChatRequest>,
) -> Result<ResponseJson<ApiResponse<CoachSuggestions>>, ApiError> {
    let coach = coach(&state, &payload)?;
    let request = with_context(&state, &user, payload).await?;
    let suggestions = coach.suggest(&request).await?;
    Ok(ResponseJson(ApiResponse::success(suggestions)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/chat",
        Router::new()
            .route("/", post(chat))
            .route("/suggestions", post(suggestions)),
    )
}
