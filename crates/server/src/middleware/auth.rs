//! Bearer identity-token authentication for `/api` routes.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use services::services::auth::{AuthError, IdTokenClaims};
use tracing::debug;

use crate::{AppState, error::ApiError};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The signed-in user, available to handlers as an `Extension`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    pub signed_in_at: DateTime<Utc>,
}

impl From<&IdTokenClaims> for AuthUser {
    fn from(claims: &IdTokenClaims) -> Self {
        Self {
            user_id: claims.user_id().to_string(),
            email: claims.email.clone(),
            signed_in_at: claims.signed_in_at(),
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Client address: the first `x-forwarded-for` hop, else the peer address.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

/// Verify the token and apply the session rules, without touching the request.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    ip: Option<IpAddr>,
) -> Result<IdTokenClaims, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;
    let verifier = state.verifier().ok_or(AuthError::NotConfigured)?;
    let claims = verifier.verify(token).await?;
    state.sessions().check(&claims, ip, Utc::now())?;
    Ok(claims)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request);
    let claims = authenticate(&state, request.headers(), ip).await?;
    let user = AuthUser::from(&claims);
    debug!(user_id = %user.user_id, "request authenticated");

    // Downstream code trusts this header only because it is overwritten here.
    let user_id = HeaderValue::from_str(&user.user_id)
        .map_err(|_| AuthError::InvalidToken("subject is not a valid header value".to_string()))?;
    request.headers_mut().insert(USER_ID_HEADER, user_id);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
