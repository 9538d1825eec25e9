// rest/mod.rs — REST API server.
//
// Axum HTTP server for the queue API (operators and the external helper)
// and the song pipeline producer endpoints.
//
// Endpoints:
//   GET    /health                                 (no auth)
//   POST   /api/v1/queue/tasks
//   GET    /api/v1/queue/tasks
//   GET    /api/v1/queue/stats
//   POST   /api/v1/queue/tasks/{id}/start
//   POST   /api/v1/queue/tasks/{id}/complete
//   POST   /api/v1/queue/tasks/{id}/fail
//   POST   /api/v1/queue/tasks/{id}/retry
//   DELETE /api/v1/queue/tasks/{id}
//   POST   /api/v1/queue/clear-completed
//   POST   /api/v1/queue/clear-failed
//   POST   /api/v1/songs
//   GET    /api/v1/songs/{id}
//   POST   /api/v1/songs/{id}/queue-upload
//   POST   /api/v1/songs/{id}/queue-download
//   POST   /api/v1/songs/{id}/progress
//   POST   /api/v1/songs/{id}/override-status

pub mod routes;

use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::storage::StoreError;
use crate::AppContext;

/// The error half of every route handler's result.
pub(crate) type ApiError = (StatusCode, Json<Value>);

pub(crate) fn bad_request(msg: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.to_string() })))
}

/// Map store failures onto HTTP statuses: missing rows are 404, refused
/// state transitions are 400, duplicate keys 409, the rest 500.
pub(crate) fn store_error(e: StoreError) -> ApiError {
    let status = match &e {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        StoreError::Conflict => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let api = Router::new()
        // Queue (operators + external helper)
        .route(
            "/queue/tasks",
            post(routes::queue::create_task).get(routes::queue::list_tasks),
        )
        .route("/queue/stats", get(routes::queue::stats))
        .route("/queue/tasks/{id}/start", post(routes::queue::start_task))
        .route(
            "/queue/tasks/{id}/complete",
            post(routes::queue::complete_task),
        )
        .route("/queue/tasks/{id}/fail", post(routes::queue::fail_task))
        .route("/queue/tasks/{id}/retry", post(routes::queue::retry_task))
        .route("/queue/tasks/{id}", delete(routes::queue::delete_task))
        .route(
            "/queue/clear-completed",
            post(routes::queue::clear_completed),
        )
        .route("/queue/clear-failed", post(routes::queue::clear_failed))
        // Songs (pipeline producers + helper progress reports)
        .route("/songs", post(routes::songs::create_song))
        .route("/songs/{id}", get(routes::songs::get_song))
        .route("/songs/{id}/queue-upload", post(routes::songs::queue_upload))
        .route(
            "/songs/{id}/queue-download",
            post(routes::songs::queue_download),
        )
        .route("/songs/{id}/progress", post(routes::songs::report_progress))
        .route(
            "/songs/{id}/override-status",
            post(routes::songs::override_status),
        )
        .layer(middleware::from_fn_with_state(ctx.clone(), require_auth));

    Router::new()
        // Health (no auth)
        .route("/health", get(routes::health::health))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bearer-token check for `/api/v1`. With no `api_token` configured the
/// API is open (local-only, trusted loopback use).
async fn require_auth(
    State(ctx): State<Arc<AppContext>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = ctx.config.api_token.as_deref() {
        let presented = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing or invalid bearer token" })),
            ));
        }
    }
    Ok(next.run(req).await)
}
