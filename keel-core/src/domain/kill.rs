//! Kill marker domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value written under a kill key
///
/// The key's presence is the signal; the value only records who was
/// targeted and when, for operators inspecting the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillMarker {
    pub pipeline_id: String,
    pub requested_at: DateTime<Utc>,
}

impl KillMarker {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Request body for the kill entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillRequest {
    pub pipeline_id: String,
}

/// An active kill signal as seen by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillEntry {
    pub pipeline_id: String,
    /// Store revision at which the marker was last written
    pub revision: u64,
    /// Time the marker was requested, when the value could be decoded
    pub requested_at: Option<DateTime<Utc>>,
}
