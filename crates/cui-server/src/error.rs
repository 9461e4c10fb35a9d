use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use claude_driver::DriverError;
use cui_core::CuiError;

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
///
/// 4xx responses carry the stable machine-readable `code` plus a human
/// `error` string; 5xx bodies are always the generic
/// `"Internal server error"` so internals never leak to clients.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self(CuiError::InvalidRequest(msg.into()).into())
    }
}

fn caller_response(status: StatusCode, code: &str, message: String) -> Response {
    let body = serde_json::json!({ "code": code, "error": message });
    (status, axum::Json(body)).into_response()
}

fn internal_response() -> Response {
    let body = serde_json::json!({ "error": "Internal server error" });
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(e) = self.0.downcast_ref::<CuiError>() {
            let status = match e {
                CuiError::MissingWorkingDirectory
                | CuiError::MissingInitialPrompt
                | CuiError::MissingSessionId
                | CuiError::MissingMessage
                | CuiError::InvalidAction(_)
                | CuiError::InvalidRequest(_)
                | CuiError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
                CuiError::ConversationNotFound(_)
                | CuiError::SessionNotFound(_)
                | CuiError::StreamingIdNotFound(_) => StatusCode::NOT_FOUND,
                CuiError::SpawnFailed(_)
                | CuiError::InitTimeout(_)
                | CuiError::SystemStatus(_)
                | CuiError::HomeNotFound
                | CuiError::Io(_)
                | CuiError::Yaml(_)
                | CuiError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status.is_client_error() {
                return caller_response(status, e.code(), e.to_string());
            }
            tracing::error!(code = e.code(), error = %e, "internal error");
            return internal_response();
        }

        if let Some(e) = self.0.downcast_ref::<DriverError>() {
            return match e {
                DriverError::StreamNotFound(id) => caller_response(
                    StatusCode::NOT_FOUND,
                    "STREAMING_ID_NOT_FOUND",
                    format!("no live stream for streaming id: {id}"),
                ),
                DriverError::PermissionNotFound(id) => caller_response(
                    StatusCode::NOT_FOUND,
                    "PERMISSION_NOT_FOUND",
                    format!("permission request not found: {id}"),
                ),
                DriverError::AlreadyDecided(id) => caller_response(
                    StatusCode::CONFLICT,
                    "ALREADY_DECIDED",
                    format!("permission request {id} was already decided"),
                ),
                DriverError::Spawn(_)
                | DriverError::InitTimeout(_)
                | DriverError::Io(_)
                | DriverError::Parse { .. }
                | DriverError::Process(_) => {
                    tracing::error!(error = %e, "driver error");
                    internal_response()
                }
            };
        }

        tracing::error!(error = %self.0, "unhandled error");
        internal_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn missing_working_directory_maps_to_400() {
        let response = AppError(CuiError::MissingWorkingDirectory.into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_session_id_maps_to_400() {
        let response = AppError(CuiError::MissingSessionId.into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn conversation_not_found_maps_to_404() {
        let response =
            AppError(CuiError::ConversationNotFound("cli-1".into()).into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn streaming_id_not_found_maps_to_404() {
        let response =
            AppError(DriverError::StreamNotFound("st-1".into()).into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn already_decided_maps_to_409() {
        let response = AppError(DriverError::AlreadyDecided("p1".into()).into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn spawn_failure_maps_to_500() {
        let response = AppError(DriverError::Spawn("ENOENT".into()).into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn init_timeout_maps_to_500() {
        let response = AppError(CuiError::InitTimeout(30).into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unknown_error_maps_to_500() {
        let response = AppError(anyhow::anyhow!("something unexpected")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn client_errors_are_json_with_code_field() {
        let response = AppError(CuiError::MissingInitialPrompt.into()).into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
