//! Pipeline synchronizer
//!
//! Replicates the pipelines namespace into the scheduler queue:
//! - Snapshot entries are pushed as `Put` unconditionally, so the initial
//!   load reflects every known pipeline
//! - Watched puts are pushed only if this node is in the pipeline's node list
//! - Watched deletes are pushed unconditionally, rebuilt from the previous
//!   value since a deletion carries no current one

use async_trait::async_trait;
use keel_core::domain::event::Event;
use keel_core::domain::pipeline::Pipeline;
use keel_core::keys::{Namespaces, id_from_key};
use keel_store::{CoordinationStore, KeyValue, Snapshot, WatchEvent, WatchEventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bootstrap::{BootstrapPolicy, RetryPolicy};
use super::replicator::{Replicator, WatchHandler};
use super::status::SyncStatus;
use super::SyncError;
use crate::scheduler::EventSink;

/// Keeps the scheduler in step with pipeline definitions
pub struct PipelineSynchronizer {
    node_id: String,
    prefix: String,
    sink: Arc<dyn EventSink>,
    replicator: Replicator,
}

impl PipelineSynchronizer {
    /// Creates a synchronizer for `node_id`
    ///
    /// # Arguments
    /// * `store` - Coordination store handle
    /// * `namespaces` - Namespace layout; the pipelines namespace is watched
    /// * `node_id` - Identifier matched against each pipeline's node list
    /// * `sink` - Scheduler queue
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        namespaces: &Namespaces,
        node_id: String,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let prefix = namespaces.pipelines_prefix();
        let replicator = Replicator::new(store, prefix.clone(), SyncStatus::new("pipelines"));
        Self {
            node_id,
            prefix,
            sink,
            replicator,
        }
    }

    pub fn with_bootstrap_policy(mut self, policy: BootstrapPolicy) -> Self {
        self.replicator = self.replicator.with_bootstrap_policy(policy);
        self
    }

    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.replicator = self.replicator.with_reconnect_policy(policy);
        self
    }

    /// Throttles event delivery with a pause after every watch batch
    pub fn with_batch_pause(mut self, pause: Option<Duration>) -> Self {
        self.replicator = self.replicator.with_batch_pause(pause);
        self
    }

    pub fn status(&self) -> SyncStatus {
        self.replicator.status().clone()
    }

    /// Replicates until shutdown
    ///
    /// Returns an error when no snapshot can be acquired or the watch cannot
    /// be resumed; callers treat both as fatal for the node.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SyncError> {
        info!(
            "Starting pipeline synchronizer for node {} on {}",
            self.node_id, self.prefix
        );
        self.replicator.run(self, &shutdown).await
    }

    fn decode(kv: &KeyValue) -> Option<Pipeline> {
        match Pipeline::from_slice(&kv.value) {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                warn!(
                    "Skipping undecodable pipeline at {} (revision {}): {}",
                    kv.key, kv.mod_revision, e
                );
                None
            }
        }
    }

    /// Rebuilds the deleted pipeline, falling back to the id in the key
    fn deleted_pipeline(&self, event: &WatchEvent) -> Option<Pipeline> {
        if let Some(pipeline) = event.prev_kv.as_ref().and_then(Self::decode) {
            return Some(pipeline);
        }

        match id_from_key(&self.prefix, &event.kv.key) {
            Some(id) => Some(Pipeline::new(id)),
            None => {
                warn!("Ignoring delete of unexpected key {}", event.kv.key);
                None
            }
        }
    }
}

#[async_trait]
impl WatchHandler for PipelineSynchronizer {
    async fn on_snapshot(&self, snapshot: Snapshot) -> usize {
        let mut emitted = 0;

        for kv in &snapshot.entries {
            if let Some(pipeline) = Self::decode(kv) {
                self.sink.push(Event::put(pipeline)).await;
                emitted += 1;
            }
        }

        emitted
    }

    async fn on_event(&self, event: WatchEvent) -> usize {
        match event.kind {
            WatchEventKind::Put => {
                let Some(pipeline) = Self::decode(&event.kv) else {
                    return 0;
                };

                if !pipeline.is_bound_to(&self.node_id) {
                    debug!(
                        "Pipeline {} is not bound to node {}, skipping",
                        pipeline.id, self.node_id
                    );
                    return 0;
                }

                debug!("Pipeline {} updated at revision {}", pipeline.id, event.revision());
                self.sink.push(Event::put(pipeline)).await;
                1
            }
            WatchEventKind::Delete => {
                let Some(pipeline) = self.deleted_pipeline(&event) else {
                    return 0;
                };

                debug!("Pipeline {} deleted at revision {}", pipeline.id, event.revision());
                self.sink.push(Event::delete(pipeline)).await;
                1
            }
        }
    }
}
