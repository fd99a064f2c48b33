use std::{env, fs, path::PathBuf};

use ts_rs::TS;

fn generate_types_content() -> String {
    let header = "// This file was generated by `cargo run --bin generate-types`. Do not edit by hand.\n";
    let decls = [
        db::models::goal::Goal::decl(),
        db::models::goal::CreateGoal::decl(),
        db::models::goal::GoalProgress::decl(),
        db::models::goal::ProgressSource::decl(),
        db::models::task::Task::decl(),
        db::models::task::CreateTask::decl(),
        db::models::task::TaskPriority::decl(),
        db::models::task::Recurrence::decl(),
        services::services::state::GoalState::decl(),
        services::services::events::PermissionError::decl(),
        services::services::goals::TaskToggle::decl(),
        services::services::coach::ChatRequest::decl(),
        services::services::coach::CoachSuggestions::decl(),
        services::services::coach::SuggestedGoal::decl(),
        services::services::coach::SuggestedTask::decl(),
        services::services::automation::TimerCompletion::decl(),
        services::services::focus_timer::TimerPhase::decl(),
        services::services::google::CalendarEvent::decl(),
        services::services::google::EventDateTime::decl(),
        services::services::google::CreateCalendarEvent::decl(),
        services::services::google::UpdateCalendarEvent::decl(),
        services::services::google::DriveFile::decl(),
        services::services::api_client::HealthStatus::decl(),
        services::services::api_client::AuthStatus::decl(),
        services::services::database_health::DatabaseReport::decl(),
        server::routes::goals::GoalDeleted::decl(),
        server::routes::health::ClientErrorReport::decl(),
        server::routes::health::ClientErrorOutcome::decl(),
        server::routes::sync::SessionNotice::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|d| {
            let trimmed = d.trim_start();
            if trimmed.starts_with("export") {
                d
            } else {
                format!("export {trimmed}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{header}\n{body}\n")
}

fn main() -> std::io::Result<()> {
    let out: PathBuf = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("shared/types.ts"));
    let content = generate_types_content();

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&out, content)?;
    println!("wrote {}", out.display());
    Ok(())
}
