//! Kill API Handlers

use axum::{Json, extract::State, http::StatusCode};
use keel_core::domain::kill::{KillEntry, KillRequest};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /pipeline/kill
/// Publish a kill signal for a pipeline
///
/// Accepted means the marker was written; nodes act on it asynchronously.
pub async fn request_kill(
    State(state): State<AppState>,
    Json(req): Json<KillRequest>,
) -> ApiResult<StatusCode> {
    tracing::info!("Kill request for pipeline: {}", req.pipeline_id);

    state.emitter.request_kill(&req.pipeline_id).await?;

    Ok(StatusCode::ACCEPTED)
}

/// GET /killer/active
/// List kill markers currently active on this node
pub async fn list_active(State(state): State<AppState>) -> Json<Vec<KillEntry>> {
    Json(state.registry.entries())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::api::test_support;
    use keel_store::{CoordinationStore, MemoryStore};

    fn kill(id: &str) -> Json<KillRequest> {
        Json(KillRequest {
            pipeline_id: id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_request_kill_writes_marker() {
        let store = MemoryStore::new();
        let state = test_support::state(&store);

        let status = request_kill(State(state), kill("p1")).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(store.get("/keel/killer/p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_request_kill_errors() {
        let store = MemoryStore::new();
        let state = test_support::state(&store);

        let invalid = request_kill(State(state.clone()), kill("")).await;
        assert!(matches!(invalid, Err(ApiError::BadRequest(_))));

        store.set_available(false);
        let unavailable = request_kill(State(state), kill("p1")).await;
        assert!(matches!(unavailable, Err(ApiError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_list_active_is_empty_without_watcher() {
        let state = test_support::state(&MemoryStore::new());
        let Json(entries) = list_active(State(state)).await;
        assert!(entries.is_empty());
    }
}
