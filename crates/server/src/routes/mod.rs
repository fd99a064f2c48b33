use axum::{Router, middleware::from_fn_with_state};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{AppState, middleware::require_auth};

pub mod calendar;
pub mod chat;
pub mod goals;
pub mod health;
pub mod session;
pub mod sync;
pub mod tasks;
pub mod timer;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(goals::router(&state))
        .merge(tasks::router(&state))
        .merge(sync::router(&state))
        .merge(chat::router(&state))
        .merge(timer::router(&state))
        .merge(calendar::router(&state))
        .merge(session::router(&state))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let api = Router::new().merge(health::router(&state)).merge(protected);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
