pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use cui_core::config::Config;
use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Conversations
        .route(
            "/api/conversations/start",
            post(routes::conversations::start),
        )
        .route(
            "/api/conversations/resume",
            post(routes::conversations::resume),
        )
        .route("/api/conversations", get(routes::conversations::list))
        .route(
            "/api/conversations/{id}/stop",
            post(routes::conversations::stop),
        )
        .route(
            "/api/conversations/{id}/update",
            put(routes::conversations::update),
        )
        .route("/api/conversations/{id}", get(routes::conversations::get))
        // Live NDJSON streams
        .route("/api/stream/{id}", get(routes::stream::stream))
        // Permissions
        .route("/api/permissions/notify", post(routes::permissions::notify))
        .route("/api/permissions", get(routes::permissions::list))
        .route(
            "/api/permissions/{id}/decision",
            post(routes::permissions::decide),
        )
        .route("/api/permissions/{id}/wait", get(routes::permissions::wait))
        // System
        .route("/api/system/status", get(routes::system::status))
        .route(
            "/api/working-directories",
            get(routes::system::working_directories),
        )
        // Preferences
        .route(
            "/api/preferences",
            get(routes::preferences::get).put(routes::preferences::put),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the cui server: wire the service graph from `config`, bind, and
/// serve until ctrl-c; children are stopped and subscribers dropped on the
/// way out.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(config, listener).await
}

/// Start the server on a pre-bound listener.
///
/// Accepts a `TcpListener` that was already bound so the caller can read
/// the actual port first (useful when `port = 0` and the OS picks one).
pub async fn serve_on(config: Config, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    tracing::info!("cui server listening on http://{}:{actual_port}", config.host);

    let app_state = AppState::build(config)?;
    let shutdown_state = app_state.clone();
    let app = build_router(app_state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_state.shutdown().await;
        })
        .await?;
    Ok(())
}
