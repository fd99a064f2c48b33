use axum::{
    Extension, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::goal::{CreateGoal, Goal, GoalProgress, UpdateGoal};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::AuthUser};

#[derive(Debug, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct GoalDeleted {
    pub id: Uuid,
    pub tasks_removed: usize,
}

pub async fn list_goals(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<ResponseJson<ApiResponse<Vec<Goal>>>, ApiError> {
    let goals = state.goals().list_goals(&user.user_id).await?;
    Ok(ResponseJson(ApiResponse::success(goals)))
}

pub async fn create_goal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    axum::Json(payload): axum::Json<CreateGoal>,
) -> Result<ResponseJson<ApiResponse<Goal>>, ApiError> {
    let goal = state.goals().create_goal(&user.user_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(goal)))
}

pub async fn get_goal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Goal>>, ApiError> {
    let goal = state.goals().get_goal(&user.user_id, goal_id).await?;
    Ok(ResponseJson(ApiResponse::success(goal)))
}

pub async fn update_goal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateGoal>,
) -> Result<ResponseJson<ApiResponse<Goal>>, ApiError> {
    let goal = state.goals().update_goal(&user.user_id, goal_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(goal)))
}

/// DELETE /api/goals/{goal_id}
/// Removes the goal together with all of its tasks
pub async fn delete_goal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<GoalDeleted>>, ApiError> {
    let tasks_removed = state.goals().delete_goal(&user.user_id, goal_id).await?;
    Ok(ResponseJson(ApiResponse::success(GoalDeleted {
        id: goal_id,
        tasks_removed,
    })))
}

pub async fn goal_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<GoalProgress>>, ApiError> {
    let progress = state.goals().goal_progress(&user.user_id, goal_id).await?;
    Ok(ResponseJson(ApiResponse::success(progress)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/goals",
        Router::new()
            .route("/", get(list_goals).post(create_goal))
            .route("/{goal_id}", get(get_goal).put(update_goal).delete(delete_goal))
            .route("/{goal_id}/progress", get(goal_progress)),
    )
}
