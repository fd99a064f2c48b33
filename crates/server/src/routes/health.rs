use axum::{
    Router,
    extract::State,
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use services::services::{
    api_client::{AuthStatus, HealthStatus},
    database_health::{DatabaseHealth, DatabaseReport},
};
use tracing::{debug, error, warn};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::auth::authenticate};

pub async fn health(State(state): State<AppState>) -> ResponseJson<ApiResponse<HealthStatus>> {
    let database = DatabaseHealth::new(state.db().pool.clone()).ping().await;
    ResponseJson(ApiResponse::success(HealthStatus {
        status: if database { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    }))
}

pub async fn database_report(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<DatabaseReport>>, ApiError> {
    let report = DatabaseHealth::new(state.db().pool.clone()).report().await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

/// GET /api/auth/status
/// Whether the caller's token is currently accepted. Never fails; an
/// unusable token just reports `authenticated: false`.
pub async fn auth_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ResponseJson<ApiResponse<AuthStatus>> {
    let status = match authenticate(&state, &headers, None).await {
        Ok(claims) => AuthStatus {
            authenticated: true,
            user_id: Some(claims.user_id().to_string()),
            email: claims.email.clone(),
            session_expires_at: Some(claims.session().expires_at()),
        },
        Err(e) => {
            debug!(code = e.code(), "auth status: not authenticated");
            AuthStatus {
                authenticated: false,
                user_id: None,
                email: None,
                session_expires_at: None,
            }
        }
    };
    ResponseJson(ApiResponse::success(status))
}

#[derive(Debug, Deserialize, TS)]
pub struct ClientErrorReport {
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
pub struct ClientErrorOutcome {
    pub logged: bool,
}

/// POST /api/client-errors
/// Errors reported by UI clients, logged unless they are known noise
pub async fn report_client_error(
    State(state): State<AppState>,
    axum::Json(report): axum::Json<ClientErrorReport>,
) -> ResponseJson<ApiResponse<ClientErrorOutcome>> {
    if state.noise().is_benign(&report.message) {
        debug!(message = %report.message, "suppressed benign client error");
        return ResponseJson(ApiResponse::success(ClientErrorOutcome { logged: false }));
    }
    let source = report.source.as_deref().unwrap_or("unknown");
    match &report.stack {
        Some(stack) => error!(source, stack = %stack, "client error: {}", report.message),
        None => warn!(source, "client error: {}", report.message),
    }
    ResponseJson(ApiResponse::success(ClientErrorOutcome { logged: true }))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/database", get(database_report))
        .route("/auth/status", get(auth_status))
        .route("/client-errors", post(report_client_error))
}
