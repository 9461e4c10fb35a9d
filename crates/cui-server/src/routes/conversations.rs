use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use claude_driver::records::McpServerStatus;
use claude_driver::SessionConfig;
use cui_core::types::{ListQuery, PermissionMode, SessionInfo, SessionInfoPatch};
use cui_core::CuiError;

use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Start / resume
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StartRequest {
    model: Option<String>,
    allowed_tools: Vec<String>,
    disallowed_tools: Vec<String>,
    system_prompt: Option<String>,
    permission_mode: Option<PermissionMode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    streaming_id: String,
    stream_url: String,
    session_id: String,
    cwd: String,
    tools: Vec<String>,
    mcp_servers: Vec<McpServerStatus>,
    model: String,
    permission_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key_source: Option<String>,
}

/// POST /api/conversations/start — spawn a fresh CLI child.
pub async fn start(
    State(app): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<StartResponse>, AppError> {
    let working_directory = require_string(&body, "workingDirectory")
        .ok_or_else(|| AppError(CuiError::MissingWorkingDirectory.into()))?;
    let initial_prompt = require_string(&body, "initialPrompt")
        .ok_or_else(|| AppError(CuiError::MissingInitialPrompt.into()))?;
    let request: StartRequest = serde_json::from_value(body)
        .map_err(|e| AppError::invalid_request(e.to_string()))?;

    let config = SessionConfig {
        working_directory: Some(PathBuf::from(working_directory)),
        prompt: initial_prompt,
        model: request.model,
        allowed_tools: request.allowed_tools,
        disallowed_tools: request.disallowed_tools,
        system_prompt: request.system_prompt,
        permission_mode: request.permission_mode,
        ..Default::default()
    };

    launch(&app, config).await.map(Json)
}

/// POST /api/conversations/resume — new child continuing a prior session.
/// The body is exactly `{ sessionId, message }`; extra fields are rejected.
pub async fn resume(
    State(app): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<StartResponse>, AppError> {
    let session_id = require_string(&body, "sessionId")
        .ok_or_else(|| AppError(CuiError::MissingSessionId.into()))?;
    let message = require_string(&body, "message")
        .ok_or_else(|| AppError(CuiError::MissingMessage.into()))?;
    if let Some(object) = body.as_object() {
        for key in object.keys() {
            if key != "sessionId" && key != "message" {
                return Err(AppError::invalid_request(format!("unexpected field: {key}")));
            }
        }
    }

    let config = SessionConfig {
        prompt: message,
        resume_session_id: Some(session_id),
        ..Default::default()
    };

    launch(&app, config).await.map(Json)
}

async fn launch(app: &AppState, config: SessionConfig) -> Result<StartResponse, AppError> {
    let started = app.manager.start(config).await?;
    let init = started.system_init;
    Ok(StartResponse {
        stream_url: format!("/api/stream/{}", started.streaming_id),
        streaming_id: started.streaming_id,
        session_id: init.session_id,
        cwd: init.cwd,
        tools: init.tools,
        mcp_servers: init.mcp_servers,
        model: init.model,
        permission_mode: init.permission_mode,
        api_key_source: init.api_key_source,
    })
}

/// POST /api/conversations/:id/stop — soft-stop a live conversation.
/// Unknown streaming ids report `success: false` rather than erroring.
pub async fn stop(
    State(app): State<AppState>,
    Path(streaming_id): Path<String>,
) -> Json<serde_json::Value> {
    let stopped = app.manager.stop(&streaming_id);
    Json(serde_json::json!({ "success": stopped }))
}

// ---------------------------------------------------------------------------
// Listing / fetch
// ---------------------------------------------------------------------------

/// GET /api/conversations — filtered, sorted, paginated history index.
pub async fn list(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<cui_core::types::ConversationPage>, AppError> {
    let history = app.history.clone();
    let page = tokio::task::spawn_blocking(move || history.list_conversations(&query))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    messages: Vec<serde_json::Value>,
    summary: String,
    project_path: String,
    metadata: ConversationMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    total_duration: u64,
    model: String,
}

/// GET /api/conversations/:id — full message history for one session.
///
/// A session the CLI has not flushed yet would 404 here even though it is
/// live; in that case a single synthesized user message is reconstructed
/// from the status tracker's context instead.
pub async fn get(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let history = app.history.clone();
    let fetched = {
        let session_id = session_id.clone();
        tokio::task::spawn_blocking(move || {
            let messages = history.fetch_conversation(&session_id)?;
            let metadata = history.get_conversation_metadata(&session_id)?;
            Ok::<_, CuiError>((messages, metadata))
        })
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?
    };

    match fetched {
        Ok((messages, metadata)) => Ok(Json(ConversationResponse {
            messages: messages
                .into_iter()
                .map(|m| serde_json::to_value(m).unwrap_or_default())
                .collect(),
            summary: metadata.summary,
            project_path: metadata.project_path,
            metadata: ConversationMetadata {
                total_duration: metadata.total_duration_ms,
                model: metadata.model,
            },
        })),
        Err(CuiError::ConversationNotFound(_)) => optimistic_view(&app, &session_id),
        Err(e) => Err(e.into()),
    }
}

/// Synthesize the optimistic single-message view for an active but not yet
/// persisted session; 404 when the session is not ongoing either.
fn optimistic_view(
    app: &AppState,
    session_id: &str,
) -> Result<Json<ConversationResponse>, AppError> {
    let context = app
        .tracker
        .get_streaming_id(session_id)
        .and_then(|streaming_id| app.tracker.get_context(&streaming_id))
        .ok_or_else(|| AppError(CuiError::ConversationNotFound(session_id.to_owned()).into()))?;

    let message = serde_json::json!({
        "uuid": format!("active-{session_id}-user"),
        "type": "user",
        "message": { "role": "user", "content": context.initial_prompt },
        "timestamp": context.timestamp,
        "sessionId": session_id,
        "cwd": context.working_directory,
    });

    Ok(Json(ConversationResponse {
        messages: vec![message],
        summary: String::new(),
        project_path: context.working_directory,
        metadata: ConversationMetadata {
            total_duration: 0,
            model: context.model.unwrap_or_default(),
        },
    }))
}

// ---------------------------------------------------------------------------
// Session-info updates
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    success: bool,
    session_info: SessionInfo,
}

/// PUT /api/conversations/:id/update — partial session-info patch.
pub async fn update(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
    Json(patch): Json<SessionInfoPatch>,
) -> Result<Json<UpdateResponse>, AppError> {
    if session_id.trim().is_empty() {
        return Err(AppError(CuiError::MissingSessionId.into()));
    }
    let info = app.session_info.update(&session_id, patch)?;
    Ok(Json(UpdateResponse {
        success: true,
        session_info: info,
    }))
}

fn require_string(body: &serde_json::Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
