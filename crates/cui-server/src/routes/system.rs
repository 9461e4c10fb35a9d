use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use cui_core::history::WorkingDirectory;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    version: String,
    uptime_secs: i64,
    active_sessions: usize,
    claude_binary: Option<String>,
    session_count: usize,
    db_size: u64,
}

/// GET /api/system/status — health snapshot for the frontend header.
pub async fn status(State(app): State<AppState>) -> Result<Json<SystemStatus>, AppError> {
    let claude_binary = app
        .config
        .claude_binary
        .clone()
        .or_else(|| which::which("claude").ok())
        .map(|p| p.to_string_lossy().into_owned());

    let stats = app.session_info.stats();
    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        uptime_secs: (Utc::now() - app.started_at).num_seconds(),
        active_sessions: app.manager.active_count(),
        claude_binary,
        session_count: stats.session_count,
        db_size: stats.db_size,
    }))
}

/// GET /api/working-directories — distinct project directories, persisted
/// history first, merged with directories of live-but-unflushed sessions.
pub async fn working_directories(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let history = app.history.clone();
    let mut directories = tokio::task::spawn_blocking(move || history.working_directories())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;

    for (_, streaming_id) in app.tracker.list_ongoing() {
        let Some(context) = app.tracker.get_context(&streaming_id) else {
            continue;
        };
        if directories.iter().any(|d| d.path == context.working_directory) {
            continue;
        }
        directories.push(WorkingDirectory {
            path: context.working_directory,
            last_used: context.timestamp,
            conversation_count: 1,
        });
    }
    directories.sort_by(|a, b| b.last_used.cmp(&a.last_used));

    Ok(Json(serde_json::json!({ "directories": directories })))
}
