//! Kill-request emitter
//!
//! Publishes a kill marker bound to a short lease. Every node watching the
//! kill namespace sees the marker appear; the store removes it once the
//! lease runs out, so nothing has to clean up after a request.

use keel_core::domain::kill::KillMarker;
use keel_core::keys::Namespaces;
use keel_store::{CoordinationStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Kill request failures
#[derive(Debug, Error)]
pub enum KillError {
    #[error("Invalid pipeline id: {0:?}")]
    InvalidPipelineId(String),

    #[error("Failed to publish kill marker: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Failed to encode kill marker: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes lease-bound kill markers
#[derive(Clone)]
pub struct KillEmitter {
    store: Arc<dyn CoordinationStore>,
    namespaces: Namespaces,
    ttl: Duration,
}

impl KillEmitter {
    pub fn new(store: Arc<dyn CoordinationStore>, namespaces: Namespaces, ttl: Duration) -> Self {
        Self {
            store,
            namespaces,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Requests termination of a pipeline on every node
    ///
    /// Fire-and-forget: success means the marker was written, not that any
    /// node acted on it. Failures are not retried.
    pub async fn request_kill(&self, pipeline_id: &str) -> Result<(), KillError> {
        if pipeline_id.trim().is_empty() || pipeline_id.contains('/') {
            return Err(KillError::InvalidPipelineId(pipeline_id.to_string()));
        }

        let key = self.namespaces.kill_key(pipeline_id);
        let marker = serde_json::to_vec(&KillMarker::new(pipeline_id))?;

        let lease = self.store.grant_lease(self.ttl).await.map_err(|e| {
            error!("Failed to grant lease for kill of {}: {}", pipeline_id, e);
            KillError::StoreUnavailable(e)
        })?;

        let revision = self.store.put(&key, marker, Some(lease)).await.map_err(|e| {
            error!("Failed to write kill marker {}: {}", key, e);
            KillError::StoreUnavailable(e)
        })?;

        info!(
            "Kill requested for pipeline {} (lease {}, ttl {:?}, revision {})",
            pipeline_id, lease, self.ttl, revision
        );

        Ok(())
    }
}
