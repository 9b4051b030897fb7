//! API Module
//!
//! Operator HTTP API of the node agent.
//! Each submodule handles endpoints for a specific concern.

pub mod error;
pub mod health;
pub mod killer;
pub mod pipeline;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::scheduler::PipelineTable;
use crate::service::{KillEmitter, PipelinePublisher};
use crate::sync::{KillRegistry, SyncStatus};

/// Shared handles the handlers read from and write through
#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    pub table: PipelineTable,
    pub registry: KillRegistry,
    pub watchers: Vec<SyncStatus>,
    pub emitter: KillEmitter,
    pub publisher: PipelinePublisher,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipelines", get(pipeline::list_pipelines))
        .route("/pipeline", put(pipeline::publish_pipeline))
        .route("/pipeline/{id}", delete(pipeline::retract_pipeline))
        .route("/pipeline/nodes", post(pipeline::bind_nodes))
        // Kill endpoints
        .route("/pipeline/kill", post(killer::request_kill))
        .route("/killer/active", get(killer::list_active))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use keel_core::keys::Namespaces;
    use keel_store::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    /// State wired to a fresh in-memory store, with no watchers running
    pub fn state(store: &MemoryStore) -> AppState {
        let namespaces = Namespaces::default();
        AppState {
            node_id: "n1".to_string(),
            table: PipelineTable::new(),
            registry: KillRegistry::new(),
            watchers: vec![SyncStatus::new("pipelines"), SyncStatus::new("killer")],
            emitter: KillEmitter::new(
                Arc::new(store.clone()),
                namespaces.clone(),
                Duration::from_secs(2),
            ),
            publisher: PipelinePublisher::new(Arc::new(store.clone()), namespaces),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncPhase;
    use axum::{extract::State, http::StatusCode};
    use keel_store::MemoryStore;

    #[test]
    fn test_router_builds() {
        let _router = create_router(test_support::state(&MemoryStore::new()));
    }

    #[tokio::test]
    async fn test_health_reports_failed_watcher() {
        let state = test_support::state(&MemoryStore::new());

        let (status, report) = health::health_check(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.watchers.len(), 2);
        assert_eq!(report.node_id, "n1");

        state.watchers[1].set_phase(SyncPhase::Failed);
        let (status, report) = health::health_check(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!report.healthy);
    }
}
