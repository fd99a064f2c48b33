use axum::{Extension, Router, extract::State, response::Json as ResponseJson, routing::post};
use serde::Deserialize;
use services::services::automation::TimerCompletion;
use tracing::info;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::AuthUser};

/// Body of `POST /api/timer/complete`; both fields are required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerCompleteRequest {
    pub task_name: Option<String>,
    pub duration_minutes: Option<u32>,
}

impl TimerCompleteRequest {
    fn into_completion(self) -> Result<TimerCompletion, ApiError> {
        let task_name = self
            .task_name
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        match (task_name, self.duration_minutes) {
            (Some(task_name), Some(minutes)) if minutes > 0 => {
                Ok(TimerCompletion::new(task_name, minutes))
            }
            _ => Err(ApiError::BadRequest(
                "taskName and durationMinutes are required".to_string(),
            )),
        }
    }
}

/// POST /api/timer/complete
/// Forwards a finished focus session to the automation webhook
pub async fn complete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    axum::Json(payload): axum::Json<TimerCompleteRequest>,
) -> Result<ResponseJson<ApiResponse<TimerCompletion>>, ApiError> {
    let completion = payload.into_completion()?;
    state.webhook().notify_completion(&completion).await?;
    info!(user_id = %user.user_id, task = %completion.task_name, "focus session completed");
    Ok(ResponseJson(ApiResponse::success(completion)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/timer/complete", post(complete))
}
