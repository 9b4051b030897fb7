//! Pipeline Publisher
//!
//! Store side of the pipeline CRUD write path. Whatever is written here
//! reaches every node through its pipeline synchronizer.

use keel_core::domain::pipeline::Pipeline;
use keel_core::keys::Namespaces;
use keel_store::{CoordinationStore, Revision, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Publisher error type
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Pipeline {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Failed to encode pipeline: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Stored pipeline {id} cannot be decoded: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Writes pipeline definitions to the pipelines namespace
#[derive(Clone)]
pub struct PipelinePublisher {
    store: Arc<dyn CoordinationStore>,
    namespaces: Namespaces,
}

impl PipelinePublisher {
    pub fn new(store: Arc<dyn CoordinationStore>, namespaces: Namespaces) -> Self {
        Self { store, namespaces }
    }

    /// Creates or replaces a pipeline
    ///
    /// A pipeline without an id gets a fresh UUID.
    ///
    /// # Returns
    /// The stored pipeline and the revision of the write
    pub async fn publish(&self, mut pipeline: Pipeline) -> Result<(Pipeline, Revision)> {
        if pipeline.id.trim().is_empty() {
            pipeline.id = Uuid::new_v4().to_string();
        }
        validate_pipeline(&pipeline)?;

        let value = pipeline.to_vec().map_err(PublishError::Encode)?;
        let revision = self
            .store
            .put(&self.namespaces.pipeline_key(&pipeline.id), value, None)
            .await?;

        info!(
            "Pipeline published: {} (revision {}, nodes: {:?})",
            pipeline.id, revision, pipeline.nodes
        );

        Ok((pipeline, revision))
    }

    /// Removes a pipeline
    pub async fn retract(&self, id: &str) -> Result<Revision> {
        let revision = self
            .store
            .delete(&self.namespaces.pipeline_key(id))
            .await?
            .ok_or_else(|| PublishError::NotFound(id.to_string()))?;

        info!("Pipeline retracted: {} (revision {})", id, revision);

        Ok(revision)
    }

    /// Reads a pipeline as currently stored
    pub async fn fetch(&self, id: &str) -> Result<Pipeline> {
        let kv = self
            .store
            .get(&self.namespaces.pipeline_key(id))
            .await?
            .ok_or_else(|| PublishError::NotFound(id.to_string()))?;

        Pipeline::from_slice(&kv.value).map_err(|source| PublishError::Decode {
            id: id.to_string(),
            source,
        })
    }

    /// Replaces the node list of an existing pipeline
    pub async fn bind_nodes(&self, id: &str, nodes: Vec<String>) -> Result<(Pipeline, Revision)> {
        let mut pipeline = self.fetch(id).await?;
        pipeline.nodes = nodes;
        self.publish(pipeline).await
    }
}

fn validate_pipeline(pipeline: &Pipeline) -> Result<()> {
    if pipeline.id.contains('/') {
        return Err(PublishError::Validation(
            "Pipeline id cannot contain '/'".to_string(),
        ));
    }

    if pipeline.nodes.iter().any(|node| node.trim().is_empty()) {
        return Err(PublishError::Validation(
            "Node ids cannot be empty".to_string(),
        ));
    }

    Ok(())
}
