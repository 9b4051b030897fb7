//! Health Check API Handler
//!
//! Reports the node id and the replication state of each watcher.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::api::AppState;
use crate::sync::{StatusReport, SyncPhase};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub node_id: String,
    pub healthy: bool,
    pub watchers: Vec<StatusReport>,
}

/// GET /health
/// Returns 503 once a watcher has failed for good
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let watchers: Vec<_> = state.watchers.iter().map(|status| status.report()).collect();
    let healthy = watchers
        .iter()
        .all(|report| report.phase != SyncPhase::Failed);

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthReport {
            node_id: state.node_id.clone(),
            healthy,
            watchers,
        }),
    )
}
