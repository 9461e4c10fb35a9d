use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::time::Duration;

use claude_driver::{Decision, PermissionRequest, PermissionStatus};

use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helper-facing endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    pub streaming_id: String,
}

/// POST /api/permissions/notify — the control-plane helper records a
/// pending tool-use approval and receives the minted request id.
pub async fn notify(
    State(app): State<AppState>,
    Json(body): Json<NotifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.tool_name.trim().is_empty() {
        return Err(AppError::invalid_request("toolName is required"));
    }
    if body.streaming_id.trim().is_empty() {
        return Err(AppError::invalid_request("streamingId is required"));
    }

    let request = app
        .permissions
        .notify(&body.streaming_id, &body.tool_name, body.tool_input);
    Ok(Json(serde_json::json!({ "success": true, "id": request.id })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionQuery {
    pub streaming_id: Option<String>,
    pub status: Option<String>,
}

/// GET /api/permissions?streamingId&status — filtered lookup. Completed
/// requests stay listed for audit.
pub async fn list(
    State(app): State<AppState>,
    Query(query): Query<PermissionQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(PermissionStatus::Pending),
        Some("approved") => Some(PermissionStatus::Approved),
        Some("denied") => Some(PermissionStatus::Denied),
        Some(other) => {
            return Err(AppError::invalid_request(format!(
                "invalid status filter: {other}"
            )))
        }
    };

    let permissions = app
        .permissions
        .get_all(query.streaming_id.as_deref(), status);
    Ok(Json(serde_json::json!({ "permissions": permissions })))
}

// ---------------------------------------------------------------------------
// Browser-facing endpoints
// ---------------------------------------------------------------------------

/// POST /api/permissions/:id/decision — apply the user's verdict.
pub async fn decide(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.get("approved").and_then(|v| v.as_bool()).is_none() {
        return Err(AppError::invalid_request("approved must be a boolean"));
    }
    let decision: Decision = serde_json::from_value(body)
        .map_err(|e| AppError::invalid_request(e.to_string()))?;

    let request = app.permissions.decide(&id, &decision)?;
    Ok(Json(serde_json::json!({ "success": true, "request": request })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WaitQuery {
    /// Seconds; clamped to the configured permission timeout.
    pub timeout: Option<u64>,
}

/// GET /api/permissions/:id/wait — request-scoped wait for the decision.
///
/// Blocks until the user decides or the timeout elapses; on timeout the
/// body carries the synthetic timed-out denial while the stored request
/// stays pending. The polling endpoints above remain for wire
/// compatibility with helpers that long-poll.
pub async fn wait(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<PermissionRequest>, AppError> {
    let cap = app.permission_timeout();
    let timeout = query
        .timeout
        .map(Duration::from_secs)
        .map(|t| t.min(cap))
        .unwrap_or(cap);

    let request = app.permissions.wait_for_decision(&id, timeout).await?;
    Ok(Json(request))
}
