//! Watcher freshness reporting
//!
//! Each watcher owns a [`SyncStatus`]; the API reads it so operators can
//! tell whether a node's view is current.

use chrono::{DateTime, Utc};
use keel_store::Revision;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Lifecycle phase of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Starting,
    Bootstrapping,
    Streaming,
    Reconnecting,
    Stopped,
    Failed,
}

/// Point-in-time view of a watcher
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub phase: SyncPhase,
    /// Last revision fully processed
    pub revision: Revision,
    pub events_emitted: u64,
    pub reconnects: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Shared, cheaply cloneable status handle
#[derive(Debug, Clone)]
pub struct SyncStatus {
    inner: Arc<RwLock<StatusReport>>,
}

impl SyncStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusReport {
                name: name.into(),
                phase: SyncPhase::Starting,
                revision: 0,
                events_emitted: 0,
                reconnects: 0,
                last_error: None,
                updated_at: Utc::now(),
            })),
        }
    }

    pub fn report(&self) -> StatusReport {
        self.inner.read().clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.read().phase
    }

    pub fn revision(&self) -> Revision {
        self.inner.read().revision
    }

    pub(crate) fn set_phase(&self, phase: SyncPhase) {
        self.update(|report| report.phase = phase);
    }

    pub(crate) fn record_revision(&self, revision: Revision) {
        self.update(|report| report.revision = report.revision.max(revision));
    }

    pub(crate) fn record_emitted(&self, count: usize) {
        if count > 0 {
            self.update(|report| report.events_emitted += count as u64);
        }
    }

    pub(crate) fn record_reconnect(&self) {
        self.update(|report| {
            report.reconnects += 1;
            report.phase = SyncPhase::Reconnecting;
        });
    }

    pub(crate) fn record_failure(&self, error: &impl std::fmt::Display) {
        let message = error.to_string();
        self.update(|report| {
            report.phase = SyncPhase::Failed;
            report.last_error = Some(message);
        });
    }

    fn update(&self, f: impl FnOnce(&mut StatusReport)) {
        let mut report = self.inner.write();
        f(&mut report);
        report.updated_at = Utc::now();
    }
}
