//! Scheduler consumer
//!
//! Drains the event queue and maintains the node's pipeline table. Execution
//! of tasks is out of scope here; the table is what an execution engine
//! would read to decide what to start, stop or cancel.

use chrono::{DateTime, Utc};
use keel_core::domain::event::{Event, EventType};
use keel_core::domain::pipeline::Pipeline;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::sink::EventQueue;

/// A pipeline as known to this node
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledPipeline {
    pub pipeline: Pipeline,
    /// Whether this node appears in the pipeline's node list
    pub bound: bool,
    pub kill_requested_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Upserted,
    Removed,
    KillRequested,
    /// Delete or kill for a pipeline this node does not know
    Ignored,
}

/// Shared, cheaply cloneable pipeline table
#[derive(Debug, Clone, Default)]
pub struct PipelineTable {
    inner: Arc<RwLock<HashMap<String, ScheduledPipeline>>>,
}

impl PipelineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pipeline_id: &str) -> Option<ScheduledPipeline> {
        self.inner.read().get(pipeline_id).cloned()
    }

    pub fn contains(&self, pipeline_id: &str) -> bool {
        self.inner.read().contains_key(pipeline_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// All known pipelines, ordered by id
    pub fn list(&self) -> Vec<ScheduledPipeline> {
        let mut pipelines: Vec<_> = self.inner.read().values().cloned().collect();
        pipelines.sort_by(|a, b| a.pipeline.id.cmp(&b.pipeline.id));
        pipelines
    }
}

/// Applies replicated events to a [`PipelineTable`]
pub struct Scheduler {
    node_id: String,
    table: PipelineTable,
}

impl Scheduler {
    pub fn new(node_id: String, table: PipelineTable) -> Self {
        Self { node_id, table }
    }

    pub fn table(&self) -> &PipelineTable {
        &self.table
    }

    /// Applies a single event
    ///
    /// Deleting or killing an unknown pipeline is a benign no-op.
    pub fn apply(&self, event: Event) -> Applied {
        let now = Utc::now();
        let mut table = self.table.inner.write();

        match event.kind {
            EventType::Put => {
                let bound = event.pipeline.is_bound_to(&self.node_id);
                let kill_requested_at = table
                    .get(&event.pipeline.id)
                    .and_then(|existing| existing.kill_requested_at);
                debug!("Upserting pipeline {} (bound: {})", event.pipeline.id, bound);
                table.insert(
                    event.pipeline.id.clone(),
                    ScheduledPipeline {
                        pipeline: event.pipeline,
                        bound,
                        kill_requested_at,
                        updated_at: now,
                    },
                );
                Applied::Upserted
            }
            EventType::Delete => match table.remove(&event.pipeline.id) {
                Some(_) => {
                    info!("Pipeline {} removed", event.pipeline.id);
                    Applied::Removed
                }
                None => {
                    debug!("Delete for unknown pipeline {}, ignoring", event.pipeline.id);
                    Applied::Ignored
                }
            },
            EventType::Kill => match table.get_mut(&event.pipeline.id) {
                Some(entry) => {
                    info!("Kill requested for pipeline {}", event.pipeline.id);
                    entry.kill_requested_at = Some(now);
                    entry.updated_at = now;
                    Applied::KillRequested
                }
                None => {
                    debug!("Kill for unknown pipeline {}, ignoring", event.pipeline.id);
                    Applied::Ignored
                }
            },
        }
    }

    /// Drains the queue until shutdown or until every producer is gone
    pub async fn run(self, mut queue: EventQueue, shutdown: CancellationToken) {
        info!("Scheduler consumer started for node {}", self.node_id);

        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                event = queue.recv() => event,
            };

            match event {
                Some(event) => {
                    self.apply(event);
                }
                None => {
                    debug!("All event producers closed");
                    break;
                }
            }
        }

        info!("Scheduler consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::sink::{ChannelSink, EventSink};

    fn scheduler() -> Scheduler {
        Scheduler::new("n1".to_string(), PipelineTable::new())
    }

    #[test]
    fn test_put_upserts_and_records_binding() {
        let scheduler = scheduler();
        assert_eq!(
            scheduler.apply(Event::put(Pipeline::new("a").with_nodes(["n1"]))),
            Applied::Upserted
        );
        assert_eq!(
            scheduler.apply(Event::put(Pipeline::new("b").with_nodes(["n2"]))),
            Applied::Upserted
        );

        assert!(scheduler.table().get("a").unwrap().bound);
        assert!(!scheduler.table().get("b").unwrap().bound);
        assert_eq!(scheduler.table().len(), 2);
    }

    #[test]
    fn test_delete_of_unknown_pipeline_is_ignored() {
        let scheduler = scheduler();
        assert_eq!(
            scheduler.apply(Event::delete(Pipeline::new("ghost"))),
            Applied::Ignored
        );

        scheduler.apply(Event::put(Pipeline::new("a")));
        assert_eq!(
            scheduler.apply(Event::delete(Pipeline::new("a"))),
            Applied::Removed
        );
        assert!(scheduler.table().is_empty());
    }

    #[test]
    fn test_kill_marks_known_pipeline() {
        let scheduler = scheduler();
        assert_eq!(scheduler.apply(Event::kill("a")), Applied::Ignored);

        scheduler.apply(Event::put(Pipeline::new("a").with_nodes(["n1"])));
        assert_eq!(scheduler.apply(Event::kill("a")), Applied::KillRequested);
        assert!(scheduler.table().get("a").unwrap().kill_requested_at.is_some());

        // An update does not clear a pending kill
        scheduler.apply(Event::put(Pipeline::new("a").with_nodes(["n1", "n2"])));
        assert!(scheduler.table().get("a").unwrap().kill_requested_at.is_some());
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_producers_close() {
        let (sink, queue) = ChannelSink::new(4);
        let table = PipelineTable::new();
        let consumer = Scheduler::new("n1".to_string(), table.clone());
        let handle = tokio::spawn(consumer.run(queue, CancellationToken::new()));

        sink.push(Event::put(Pipeline::new("a"))).await;
        sink.push(Event::put(Pipeline::new("b"))).await;
        sink.push(Event::delete(Pipeline::new("a"))).await;
        drop(sink);

        handle.await.unwrap();
        let ids: Vec<_> = table.list().into_iter().map(|p| p.pipeline.id).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
