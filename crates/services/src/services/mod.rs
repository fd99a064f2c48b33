pub mod api_client;
pub mod auth;
pub mod automation;
pub mod coach;
pub mod config;
pub mod database_health;
pub mod events;
pub mod focus_timer;
pub mod gemini;
pub mod goals;
pub mod google;
pub mod listeners;
pub mod session;
pub mod state;
pub mod sync;
