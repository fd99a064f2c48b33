use std::{convert::Infallible, time::Duration};

use async_trait::async_trait;
use axum::{
    Extension, Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt, stream};
use serde::Serialize;
use services::services::session::{SessionExpiryMonitor, SessionHooks};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, WatchStream};
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::{AppState, middleware::AuthUser};

/// Sent on the sync stream as `session` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionNotice {
    ExpiringSoon {
        #[serde(rename = "remainingSeconds")]
        remaining_seconds: i64,
    },
    Expired,
}

/// Forwards session expiry to an open sync stream and signs the user out when
/// the session ends.
struct StreamSessionHooks {
    state: AppState,
    user_id: String,
    signed_in_at: DateTime<Utc>,
    notices: mpsc::Sender<SessionNotice>,
}

#[async_trait]
impl SessionHooks for StreamSessionHooks {
    async fn warn_expiring(&self, remaining: chrono::Duration) {
        let notice = SessionNotice::ExpiringSoon {
            remaining_seconds: remaining.num_seconds(),
        };
        let _ = self.notices.send(notice).await;
    }

    async fn sign_out(&self) {
        self.state.sessions().revoke(&self.user_id, self.signed_in_at);
        self.state.sync().remove(&self.user_id);
        info!(user_id = %self.user_id, "session expired, sync stopped");
        let _ = self.notices.send(SessionNotice::Expired).await;
    }

    fn is_active(&self) -> bool {
        !self.notices.is_closed()
    }
}

/// GET /api/sync
/// Server-sent `state` events carrying the user's whole goal state, first on
/// connect and again after every change. `session` events announce expiry.
/// The user's sync runs for as long as one of their streams is open.
pub async fn stream_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.sync().subscribe(state.db(), &user.user_id);
    debug!(user_id = %user.user_id, "sync stream opened");

    let (tx, rx) = mpsc::channel(4);
    let hooks = StreamSessionHooks {
        state: state.clone(),
        user_id: user.user_id.clone(),
        signed_in_at: user.signed_in_at,
        notices: tx,
    };
    SessionExpiryMonitor::new(user.signed_in_at, hooks).spawn();

    let state_events = WatchStream::new(subscription.store().subscribe())
        .filter_map(|goal_state| async move { encode("state", &goal_state) });
    let session_events =
        ReceiverStream::new(rx).filter_map(|notice| async move { encode("session", &notice) });

    // The stream owns the subscription; a client disconnect drops both.
    let events = stream::select(state_events, session_events).map(move |event| {
        let _subscription = &subscription;
        event
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn encode<T: Serialize>(name: &'static str, payload: &T) -> Option<Result<Event, Infallible>> {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            warn!(event = name, error = %e, "failed to encode sync event");
            None
        }
    }
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/sync", get(stream_state))
}
