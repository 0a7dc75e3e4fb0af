//! Health and status handlers.

use crate::state::{AppState, ServiceStatus};
use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: ServiceStatus,
    pub version: String,
    pub commit: &'static str,
    pub services: BTreeMap<String, ServiceStatus>,
}

/// `GET /health`: liveness only, no dependency checks.
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({ "status": "healthy", "timestamp": chrono::Utc::now().to_rfc3339() }))
}

/// `GET /status`: per-service health as reported into [`ServiceStatusRegistry`](crate::state::ServiceStatusRegistry).
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let services: BTreeMap<String, ServiceStatus> = state.service_statuses.all().into_iter().collect();

    let overall = if services.values().any(|s| matches!(s, ServiceStatus::Error)) {
        ServiceStatus::Error
    } else if !services.is_empty() && services.values().all(|s| matches!(s, ServiceStatus::Active)) {
        ServiceStatus::Active
    } else {
        ServiceStatus::Starting
    };

    Json(StatusResponse {
        status: overall,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_SHORT"),
        services,
    })
}
