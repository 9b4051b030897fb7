//! Scheduler events
//!
//! Units of change handed from the watchers to the scheduler queue.

use serde::{Deserialize, Serialize};

use super::pipeline::Pipeline;

/// Kind of change carried by an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Pipeline created or updated
    Put,
    /// Pipeline removed
    Delete,
    /// Cancellation requested for a running pipeline
    Kill,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Put => write!(f, "PUT"),
            EventType::Delete => write!(f, "DELETE"),
            EventType::Kill => write!(f, "KILL"),
        }
    }
}

/// A change to be applied by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventType,
    pub pipeline: Pipeline,
}

impl Event {
    pub fn put(pipeline: Pipeline) -> Self {
        Self {
            kind: EventType::Put,
            pipeline,
        }
    }

    pub fn delete(pipeline: Pipeline) -> Self {
        Self {
            kind: EventType::Delete,
            pipeline,
        }
    }

    /// Kill events only carry the pipeline identifier
    pub fn kill(pipeline_id: impl Into<String>) -> Self {
        Self {
            kind: EventType::Kill,
            pipeline: Pipeline::new(pipeline_id),
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline.id
    }
}
