//! Identity-token verification for Google sign-in (Firebase ID tokens) and
//! per-user session tracking.

use std::{
    net::IpAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header, errors::ErrorKind, jwk::JwkSet,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::session::{SESSION_DURATION, SessionClock};

const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const KEYS_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Error, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("session expired")]
    SessionExpired,
    #[error("session revoked")]
    SessionRevoked,
    #[error("client address changed")]
    IpChanged,
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
    #[error("authentication is not configured")]
    NotConfigured,
}

impl AuthError {
    /// Stable machine-readable code, e.g. `session_expired`.
    pub fn code(&self) -> &'static str {
        self.into()
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingToken => "Please sign in to continue.",
            Self::InvalidToken(_) => "Your sign-in could not be verified. Please sign in again.",
            Self::TokenExpired => "Your sign-in has expired. Please sign in again.",
            Self::SessionExpired => "Your session has ended after 24 hours. Please sign in again.",
            Self::SessionRevoked | Self::IpChanged => {
                "Your session was ended because your network changed. Please sign in again."
            }
            Self::KeysUnavailable(_) | Self::NotConfigured => {
                "Sign-in is temporarily unavailable. Please try again later."
            }
        }
    }
}

/// Claims of a verified ID token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    /// Seconds since the epoch of the user's last sign-in.
    pub auth_time: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IdTokenClaims {
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    pub fn signed_in_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.auth_time, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn session(&self) -> SessionClock {
        SessionClock::new(self.signed_in_at())
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdTokenClaims, AuthError>;
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

/// Verifies RS256 ID tokens issued for one Firebase project against Google's
/// published signing keys.
pub struct FirebaseTokenVerifier {
    http: Client,
    project_id: String,
    jwks_url: String,
    keys: RwLock<Option<CachedKeys>>,
}

impl FirebaseTokenVerifier {
    pub fn new(project_id: impl Into<String>) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;
        Ok(Self {
            http,
            project_id: project_id.into(),
            jwks_url: GOOGLE_JWKS_URL.to_string(),
            keys: RwLock::new(None),
        })
    }

    pub fn with_jwks_url(mut self, jwks_url: impl Into<String>) -> Self {
        self.jwks_url = jwks_url.into();
        self
    }

    pub fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[self.issuer()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "aud", "iss"]);
        validation
    }

    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        debug!(url = %self.jwks_url, "fetching identity signing keys");
        let res = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;
        if !res.status().is_success() {
            return Err(AuthError::KeysUnavailable(format!("status {}", res.status())));
        }
        res.json::<JwkSet>()
            .await
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))
    }

    /// Key for `kid`, refreshing the cached set when it is stale or lacks the key.
    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cached = self.keys.read().await;
            let fresh = cached
                .as_ref()
                .filter(|c| c.fetched_at.elapsed() < KEYS_TTL)
                .and_then(|c| c.set.find(kid));
            if let Some(jwk) = fresh {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|e| AuthError::InvalidToken(e.to_string()));
            }
        }

        let set = self.fetch_keys().await?;
        let key = set
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        *self.keys.write().await = Some(CachedKeys {
            set,
            fetched_at: Instant::now(),
        });
        key.ok_or_else(|| AuthError::InvalidToken(format!("unknown signing key {kid}")))
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<IdTokenClaims, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("token has no key id".to_string()))?;
        let key = self.key_for(&kid).await?;

        let data = decode::<IdTokenClaims>(token, &key, &self.validation()).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        Ok(data.claims)
    }
}

/// Checks every 1024 requests drop sessions that have ended.
const PRUNE_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct SeenSession {
    ip: IpAddr,
    auth_time: i64,
}

/// Tracks the client address each session started from. A request from a
/// different address revokes the session: tokens from that sign-in or an
/// earlier one are refused, while a later sign-in starts afresh. Entries are
/// dropped once the session they describe would have expired anyway.
#[derive(Default)]
pub struct SessionGuard {
    last_seen: DashMap<String, SeenSession>,
    revoked_through: DashMap<String, i64>,
    checks: AtomicU64,
}

impl SessionGuard {
    pub fn check(
        &self,
        claims: &IdTokenClaims,
        ip: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(now);
        }

        let user_id = claims.user_id();
        if claims.session().is_expired(now) {
            return Err(AuthError::SessionExpired);
        }
        let revoked = self
            .revoked_through
            .get(user_id)
            .is_some_and(|revoked| claims.auth_time <= *revoked);
        if revoked {
            return Err(AuthError::SessionRevoked);
        }

        let Some(ip) = ip else {
            return Ok(());
        };
        let current = SeenSession {
            ip,
            auth_time: claims.auth_time,
        };
        let previous = self.last_seen.insert(user_id.to_string(), current);
        match previous {
            Some(previous) if previous.auth_time == claims.auth_time && previous.ip != ip => {
                warn!(
                    user_id = %user_id,
                    previous = %previous.ip,
                    current = %ip,
                    "client address changed, revoking session"
                );
                self.revoke(user_id, claims.signed_in_at());
                Err(AuthError::IpChanged)
            }
            _ => Ok(()),
        }
    }

    /// Refuse the session that started at `signed_in_at` and any earlier one.
    pub fn revoke(&self, user_id: &str, signed_in_at: DateTime<Utc>) {
        self.last_seen.remove(user_id);
        let auth_time = signed_in_at.timestamp();
        self.revoked_through
            .entry(user_id.to_string())
            .and_modify(|revoked| *revoked = (*revoked).max(auth_time))
            .or_insert(auth_time);
        info!(user_id = %user_id, "session revoked");
    }

    pub fn is_revoked(&self, user_id: &str) -> bool {
        self.revoked_through.contains_key(user_id)
    }

    /// Forget sessions that are past their expiry at `now`.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = (now - SESSION_DURATION).timestamp();
        self.last_seen.retain(|_, seen| seen.auth_time > cutoff);
        self.revoked_through.retain(|_, revoked| *revoked > cutoff);
        debug!(
            tracked = self.last_seen.len(),
            revoked = self.revoked_through.len(),
            "pruned ended sessions"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn claims(auth_time: DateTime<Utc>) -> IdTokenClaims {
        IdTokenClaims {
            sub: "uid-1".into(),
            aud: "goalflow-test".into(),
            iss: "https://securetoken.google.com/goalflow-test".into(),
            exp: (auth_time + ChronoDuration::hours(1)).timestamp(),
            iat: auth_time.timestamp(),
            auth_time: auth_time.timestamp(),
            email: Some("ada@example.com".into()),
            name: None,
        }
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn codes_and_messages() {
        assert_eq!(AuthError::SessionExpired.code(), "session_expired");
        assert_eq!(AuthError::InvalidToken("x".into()).code(), "invalid_token");
        assert_eq!(AuthError::MissingToken.user_message(), "Please sign in to continue.");
    }

    #[test]
    fn ip_change_revokes_until_next_sign_in() {
        let guard = SessionGuard::default();
        let now = Utc::now();
        let session = claims(now - ChronoDuration::minutes(10));

        assert_eq!(guard.check(&session, ip("10.0.0.1"), now), Ok(()));
        assert_eq!(guard.check(&session, ip("10.0.0.1"), now), Ok(()));
        assert_eq!(guard.check(&session, ip("10.0.0.2"), now), Err(AuthError::IpChanged));
        assert_eq!(guard.check(&session, ip("10.0.0.2"), now), Err(AuthError::SessionRevoked));

        let later = now + ChronoDuration::seconds(5);
        let fresh = claims(later);
        assert_eq!(guard.check(&fresh, ip("10.0.0.2"), later), Ok(()));
    }

    #[test]
    fn sign_in_in_the_same_second_as_a_revocation_is_accepted() {
        let guard = SessionGuard::default();
        let now = Utc::now();
        let old = claims(now - ChronoDuration::minutes(30));
        guard.revoke("uid-1", old.signed_in_at());

        assert_eq!(guard.check(&old, None, now), Err(AuthError::SessionRevoked));
        let fresh = claims(now);
        assert_eq!(guard.check(&fresh, None, now), Ok(()));
    }

    #[test]
    fn a_new_sign_in_from_another_address_is_not_an_ip_change() {
        let guard = SessionGuard::default();
        let now = Utc::now();
        let home = claims(now - ChronoDuration::hours(2));
        assert_eq!(guard.check(&home, ip("10.0.0.1"), now), Ok(()));

        let office = claims(now - ChronoDuration::minutes(1));
        assert_eq!(guard.check(&office, ip("10.0.0.9"), now), Ok(()));
    }

    #[test]
    fn ended_sessions_are_pruned() {
        let guard = SessionGuard::default();
        let now = Utc::now();
        let yesterday = claims(now - ChronoDuration::hours(23));
        assert_eq!(guard.check(&yesterday, ip("10.0.0.1"), now), Ok(()));
        guard.revoke("uid-1", yesterday.signed_in_at());
        assert!(guard.is_revoked("uid-1"));

        guard.prune(now);
        assert!(guard.is_revoked("uid-1"));
        guard.prune(now + ChronoDuration::hours(2));
        assert!(!guard.is_revoked("uid-1"));
        assert!(guard.last_seen.is_empty());
    }

    #[test]
    fn sessions_older_than_a_day_are_refused() {
        let guard = SessionGuard::default();
        let now = Utc::now();
        let stale = claims(now - ChronoDuration::hours(25));
        assert_eq!(guard.check(&stale, None, now), Err(AuthError::SessionExpired));
    }

    #[tokio::test]
    async fn malformed_tokens_are_rejected_before_key_lookup() {
        let verifier = FirebaseTokenVerifier::new("goalflow-test")
            .unwrap()
            .with_jwks_url("http://127.0.0.1:9/unreachable");
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
        assert_eq!(verifier.issuer(), "https://securetoken.google.com/goalflow-test");
    }

    #[tokio::test]
    async fn unreachable_key_endpoint_is_reported() {
        // header {"alg":"RS256","kid":"k1","typ":"JWT"}, payload {}
        let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIiwidHlwIjoiSldUIn0.e30.c2ln";
        let verifier = FirebaseTokenVerifier::new("goalflow-test")
            .unwrap()
            .with_jwks_url("http://127.0.0.1:9/unreachable");
        let err = verifier.verify(token).await.unwrap_err();
        assert!(matches!(err, AuthError::KeysUnavailable(_)));
    }
}
