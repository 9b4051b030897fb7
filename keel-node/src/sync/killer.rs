//! Kill-signal watcher
//!
//! Watches the kill namespace and keeps a registry of active kill markers.
//! A marker appearing (in the snapshot or through a put) is forwarded to the
//! scheduler as a `Kill` event; a marker disappearing (lease expiry or
//! explicit delete) only leaves the registry.

use async_trait::async_trait;
use keel_core::domain::event::Event;
use keel_core::domain::kill::{KillEntry, KillMarker};
use keel_core::keys::{Namespaces, id_from_key};
use keel_store::{CoordinationStore, KeyValue, Snapshot, WatchEvent, WatchEventKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bootstrap::{BootstrapPolicy, RetryPolicy};
use super::replicator::{Replicator, WatchHandler};
use super::status::SyncStatus;
use super::SyncError;
use crate::scheduler::EventSink;

/// Active kill markers, keyed by pipeline id
///
/// Written only by its [`KillWatcher`]; readers get an eventually
/// consistent view.
#[derive(Debug, Clone, Default)]
pub struct KillRegistry {
    inner: Arc<RwLock<HashMap<String, KillEntry>>>,
}

impl KillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pipeline_id: &str) -> bool {
        self.inner.read().contains_key(pipeline_id)
    }

    pub fn get(&self, pipeline_id: &str) -> Option<KillEntry> {
        self.inner.read().get(pipeline_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Active entries, ordered by pipeline id
    pub fn entries(&self) -> Vec<KillEntry> {
        let mut entries: Vec<_> = self.inner.read().values().cloned().collect();
        entries.sort_by(|a, b| a.pipeline_id.cmp(&b.pipeline_id));
        entries
    }

    /// Inserts or refreshes an entry; returns true if it was not active
    fn upsert(&self, entry: KillEntry) -> bool {
        self.inner
            .write()
            .insert(entry.pipeline_id.clone(), entry)
            .is_none()
    }

    fn remove(&self, pipeline_id: &str) -> Option<KillEntry> {
        self.inner.write().remove(pipeline_id)
    }

    /// Replaces the whole registry; returns the ids that were not active
    fn replace(&self, entries: Vec<KillEntry>) -> Vec<String> {
        let mut inner = self.inner.write();
        let fresh = entries
            .iter()
            .filter(|entry| !inner.contains_key(&entry.pipeline_id))
            .map(|entry| entry.pipeline_id.clone())
            .collect();
        *inner = entries
            .into_iter()
            .map(|entry| (entry.pipeline_id.clone(), entry))
            .collect();
        fresh
    }
}

/// Watches the kill namespace
pub struct KillWatcher {
    prefix: String,
    sink: Arc<dyn EventSink>,
    registry: KillRegistry,
    replicator: Replicator,
}

impl KillWatcher {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        namespaces: &Namespaces,
        sink: Arc<dyn EventSink>,
        registry: KillRegistry,
    ) -> Self {
        let prefix = namespaces.killer_prefix();
        let replicator = Replicator::new(store, prefix.clone(), SyncStatus::new("killer"));
        Self {
            prefix,
            sink,
            registry,
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

    pub fn registry(&self) -> &KillRegistry {
        &self.registry
    }

    pub fn status(&self) -> SyncStatus {
        self.replicator.status().clone()
    }

    /// Watches until shutdown
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SyncError> {
        info!("Starting kill watcher on {}", self.prefix);
        self.replicator.run(self, &shutdown).await
    }

    /// Builds a registry entry from a marker key
    ///
    /// The key alone identifies the pipeline, so an undecodable value still
    /// counts as a signal.
    fn entry(&self, kv: &KeyValue) -> Option<KillEntry> {
        let Some(pipeline_id) = id_from_key(&self.prefix, &kv.key) else {
            warn!("Ignoring kill marker with unexpected key {}", kv.key);
            return None;
        };

        let requested_at = match serde_json::from_slice::<KillMarker>(&kv.value) {
            Ok(marker) => Some(marker.requested_at),
            Err(e) => {
                warn!("Kill marker for {} has an undecodable value: {}", pipeline_id, e);
                None
            }
        };

        Some(KillEntry {
            pipeline_id: pipeline_id.to_string(),
            revision: kv.mod_revision,
            requested_at,
        })
    }
}

#[async_trait]
impl WatchHandler for KillWatcher {
    async fn on_snapshot(&self, snapshot: Snapshot) -> usize {
        let entries = snapshot
            .entries
            .iter()
            .filter_map(|kv| self.entry(kv))
            .collect();

        let fresh = self.registry.replace(entries);
        for pipeline_id in &fresh {
            info!("Kill requested for pipeline {}", pipeline_id);
            self.sink.push(Event::kill(pipeline_id.as_str())).await;
        }

        fresh.len()
    }

    async fn on_event(&self, event: WatchEvent) -> usize {
        match event.kind {
            WatchEventKind::Put => {
                let Some(entry) = self.entry(&event.kv) else {
                    return 0;
                };
                let pipeline_id = entry.pipeline_id.clone();

                if !self.registry.upsert(entry) {
                    debug!("Kill marker for {} refreshed", pipeline_id);
                    return 0;
                }

                info!("Kill requested for pipeline {}", pipeline_id);
                self.sink.push(Event::kill(pipeline_id)).await;
                1
            }
            WatchEventKind::Delete => {
                if let Some(pipeline_id) = id_from_key(&self.prefix, &event.kv.key) {
                    if self.registry.remove(pipeline_id).is_some() {
                        debug!("Kill marker for {} expired", pipeline_id);
                    }
                }
                0
            }
        }
    }
}
