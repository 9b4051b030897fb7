//! Pipeline API Handlers
//!
//! The node's view of pipelines, and the write path into the store.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use keel_core::domain::pipeline::Pipeline;
use keel_store::Revision;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::scheduler::ScheduledPipeline;

#[derive(Debug, Serialize)]
pub struct Published {
    pub pipeline: Pipeline,
    pub revision: Revision,
}

#[derive(Debug, Deserialize)]
pub struct BindNodes {
    pub pipeline_id: String,
    pub nodes: Vec<String>,
}

/// GET /pipelines
/// List pipelines known to this node's scheduler
pub async fn list_pipelines(State(state): State<AppState>) -> Json<Vec<ScheduledPipeline>> {
    tracing::debug!("Listing scheduled pipelines");
    Json(state.table.list())
}

/// PUT /pipeline
/// Create or replace a pipeline definition
pub async fn publish_pipeline(
    State(state): State<AppState>,
    Json(pipeline): Json<Pipeline>,
) -> ApiResult<Json<Published>> {
    tracing::info!("Publishing pipeline: {}", pipeline.id);

    let (pipeline, revision) = state.publisher.publish(pipeline).await?;

    Ok(Json(Published { pipeline, revision }))
}

/// DELETE /pipeline/{id}
/// Delete a pipeline definition
pub async fn retract_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Retracting pipeline: {}", id);

    state.publisher.retract(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /pipeline/nodes
/// Replace the node list of a pipeline
pub async fn bind_nodes(
    State(state): State<AppState>,
    Json(req): Json<BindNodes>,
) -> ApiResult<Json<Published>> {
    tracing::info!("Binding pipeline {} to {:?}", req.pipeline_id, req.nodes);

    let (pipeline, revision) = state.publisher.bind_nodes(&req.pipeline_id, req.nodes).await?;

    Ok(Json(Published { pipeline, revision }))
}
