use std::net::SocketAddr;

use anyhow::Context;
use db::DBService;
use server::{AppState, routes};
use services::services::{config::Config, database_health::DatabaseHealth};
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let db = DBService::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_url))?;
    DatabaseHealth::new(db.pool.clone())
        .validate()
        .await
        .context("database schema check failed")?;

    let bind = config.bind;
    let state = AppState::new(config, db).context("failed to initialise services")?;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "GoalFlow server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
