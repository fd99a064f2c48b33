use axum::{Extension, Router, extract::State, response::Json as ResponseJson, routing::post};
use tracing::info;
use utils::response::ApiResponse;

use crate::{AppState, middleware::AuthUser};

/// POST /api/auth/sign-out
/// Ends the session and stops the user's goal sync
pub async fn sign_out(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ResponseJson<ApiResponse<()>> {
    state.sessions().revoke(&user.user_id, user.signed_in_at);
    state.sync().remove(&user.user_id);
    info!(user_id = %user.user_id, "signed out");
    ResponseJson(ApiResponse::success(()))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/auth/sign-out", post(sign_out))
}
