use axum::{
    Extension, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use chrono::Utc;
use db::models::task::{CreateTask, Task, UpdateTask};
use serde::Deserialize;
use services::services::goals::TaskToggle;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::AuthUser};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub goal_id: Option<Uuid>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<TaskQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let mut tasks = state.goals().list_tasks(&user.user_id).await?;
    if let Some(goal_id) = query.goal_id {
        tasks.retain(|t| t.goal_id == goal_id);
    }
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

/// GET /api/tasks/sorted
/// Open tasks first, then by days to deadline, then by priority
pub async fn sorted_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let tasks = state.goals().sorted_tasks(&user.user_id, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    axum::Json(payload): axum::Json<CreateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = state.goals().create_task(&user.user_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn update_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = state.goals().update_task(&user.user_id, task_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.goals().delete_task(&user.user_id, task_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn toggle_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<TaskToggle>>, ApiError> {
    let toggle = state.goals().toggle_task(&user.user_id, task_id).await?;
    Ok(ResponseJson(ApiResponse::success(toggle)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/tasks",
        Router::new()
            .route("/", get(list_tasks).post(create_task))
            .route("/sorted", get(sorted_tasks))
            .route("/{task_id}", put(update_task).delete(delete_task))
            .route("/{task_id}/toggle", post(toggle_task)),
    )
}
