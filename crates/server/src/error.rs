use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    auth::AuthError,
    automation::WebhookError,
    coach::CoachError,
    database_health::DatabaseHealthError,
    goals::GoalServiceError,
    google::GoogleApiError,
};
use thiserror::Error;
use tracing::{error, warn};
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Goals(#[from] GoalServiceError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Coach(#[from] CoachError),
    #[error(transparent)]
    Google(#[from] GoogleApiError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error(transparent)]
    DatabaseHealth(#[from] DatabaseHealthError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0} is unavailable")]
    Unavailable(&'static str),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Goals(GoalServiceError::Validation(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Goals(GoalServiceError::GoalNotFound | GoalServiceError::TaskNotFound) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Auth(AuthError::KeysUnavailable(_) | AuthError::NotConfigured) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Coach(CoachError::EmptyQuery) => StatusCode::BAD_REQUEST,
            ApiError::Coach(CoachError::NotConfigured) | ApiError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Coach(CoachError::Model(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Google(GoogleApiError::Unauthorized) => StatusCode::UNAUTHORIZED,
            ApiError::Google(GoogleApiError::Http { status: 404, .. }) => StatusCode::NOT_FOUND,
            ApiError::Google(_) | ApiError::Webhook(_) => StatusCode::BAD_GATEWAY,
            ApiError::Goals(GoalServiceError::Database(_))
            | ApiError::DatabaseHealth(_)
            | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        let response = match &self {
            ApiError::Auth(auth) => {
                warn!(code = auth.code(), error = %auth, "request not authenticated");
                ApiResponse::<(), String>::error_with_data(
                    auth.code().to_string(),
                    auth.user_message(),
                )
            }
            _ if status_code.is_server_error() => {
                error!(status = status_code.as_u16(), error = %self, "request failed");
                let message = match &self {
                    ApiError::Goals(GoalServiceError::Database(_))
                    | ApiError::DatabaseHealth(_)
                    | ApiError::Database(_) => "Internal server error".to_string(),
                    other => other.to_string(),
                };
                ApiResponse::error(&message)
            }
            _ => ApiResponse::error(&self.to_string()),
        };

        (status_code, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_service_errors_to_status_codes() {
        let cases = [
            (ApiError::from(GoalServiceError::Validation("name".into())), 400),
            (ApiError::from(GoalServiceError::GoalNotFound), 404),
            (ApiError::from(AuthError::TokenExpired), 401),
            (ApiError::from(CoachError::EmptyQuery), 400),
            (ApiError::from(WebhookError::NotConfigured), 502),
            (ApiError::from(GoogleApiError::Timeout), 502),
            (ApiError::from(sqlx::Error::RowNotFound), 500),
        ];
        for (error, status) in cases {
            assert_eq!(error.status_code().as_u16(), status, "{error}");
        }
    }
}
