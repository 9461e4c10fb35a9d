use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use std::convert::Infallible;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt as _;

use claude_driver::DriverError;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/stream/:streaming_id — the live NDJSON stream.
///
/// One JSON object per line: the synthetic `connected` record first, then
/// the full replay, then live records until the terminal `closed` line.
/// Records from the CLI are forwarded without reordering; the server only
/// interleaves its own `connected`, `error`, `permission_request` and
/// `closed` records.
pub async fn stream(
    State(app): State<AppState>,
    Path(streaming_id): Path<String>,
) -> Result<Response, AppError> {
    let rx = app
        .fanout
        .subscribe(&streaming_id)
        .ok_or_else(|| AppError(DriverError::StreamNotFound(streaming_id.clone()).into()))?;

    let lines = UnboundedReceiverStream::new(rx).map(|record| {
        let mut line =
            serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_owned());
        line.push('\n');
        Ok::<_, Infallible>(Bytes::from(line))
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        )
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .header(header::CONNECTION, HeaderValue::from_static("keep-alive"))
        // Proxies must not buffer the long-poll body.
        .header(
            header::HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )
        .body(Body::from_stream(lines))
        .map_err(|e| AppError(anyhow::anyhow!("failed to build stream response: {e}")))?;

    Ok(response)
}
