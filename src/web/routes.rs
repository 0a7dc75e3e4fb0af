//! Admission API router construction.

use crate::state::AppState;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::middleware::security_headers::SecurityHeadersLayer;
use crate::web::{handlers, status};
use axum::Router;
use axum::routing::{get, post};
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;

/// Creates the Admission API router (§6).
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/meetings", post(handlers::create_meeting))
        .route("/meetings/{id}/reschedule", post(handlers::reschedule_meeting))
        .route("/meetings/{id}/join", post(handlers::notify_joined))
        .route("/meetings/{id}/cancel", post(handlers::cancel_meeting))
        .route("/meetings/{id}/end", post(handlers::end_meeting))
        .route("/meetings/by-student/{studentId}", get(handlers::list_by_student))
        .route("/meetings/upcoming", get(handlers::list_upcoming))
        .route("/meetings/past", get(handlers::list_past))
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        // Outermost: per-request ID span + severity-proportional response logging.
        RequestIdLayer,
        // Security headers on every response (HSTS is prod-only).
        SecurityHeadersLayer,
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        TimeoutLayer::new(Duration::from_secs(30)),
    ))
}
