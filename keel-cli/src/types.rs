//! Node API payloads not shared through keel-core

use chrono::{DateTime, Utc};
use keel_core::domain::pipeline::Pipeline;
use serde::{Deserialize, Serialize};

/// Entry of `GET /pipelines`
#[derive(Debug, Deserialize)]
pub struct ScheduledPipeline {
    pub pipeline: Pipeline,
    pub bound: bool,
    pub kill_requested_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Response of the pipeline write endpoints
#[derive(Debug, Deserialize)]
pub struct Published {
    pub pipeline: Pipeline,
    pub revision: u64,
}

/// Body of `POST /pipeline/nodes`
#[derive(Debug, Serialize)]
pub struct BindNodes {
    pub pipeline_id: String,
    pub nodes: Vec<String>,
}

/// Response of `GET /health`
#[derive(Debug, Deserialize)]
pub struct HealthReport {
    pub node_id: String,
    pub healthy: bool,
    pub watchers: Vec<WatcherStatus>,
}

#[derive(Debug, Deserialize)]
pub struct WatcherStatus {
    pub name: String,
    pub phase: String,
    pub revision: u64,
    pub events_emitted: u64,
    pub reconnects: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_report_decodes() {
        let body = r#"{
            "node_id": "n1",
            "healthy": false,
            "watchers": [{
                "name": "killer",
                "phase": "failed",
                "revision": 7,
                "events_emitted": 2,
                "reconnects": 1,
                "last_error": "Watch on /keel/killer/ closed",
                "updated_at": "2026-01-01T00:00:00Z"
            }]
        }"#;

        let report: HealthReport = serde_json::from_str(body).unwrap();
        assert!(!report.healthy);
        assert_eq!(report.watchers[0].phase, "failed");
        assert_eq!(report.watchers[0].revision, 7);
    }
}
