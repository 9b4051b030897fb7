//! Snapshot-then-watch replication loop
//!
//! Shared by every watcher. The loop guarantees the handler sees each
//! change after the snapshot revision exactly once and in revision order,
//! across resubscriptions.

use async_trait::async_trait;
use keel_store::{CoordinationStore, Revision, Snapshot, WatchEvent, WatchStream};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bootstrap::{BootstrapPolicy, RetryPolicy, acquire_snapshot, retry};
use super::status::{SyncPhase, SyncStatus};
use super::SyncError;

/// Reacts to replicated state
///
/// Both methods return the number of scheduler events they emitted.
#[async_trait]
pub trait WatchHandler: Send + Sync {
    /// Called with every snapshot, including re-bootstraps after compaction
    async fn on_snapshot(&self, snapshot: Snapshot) -> usize;

    /// Called for each change, in revision order
    async fn on_event(&self, event: WatchEvent) -> usize;
}

enum StreamEnd {
    Cancelled,
    Closed,
}

enum Resubscribe {
    Subscribed(WatchStream),
    Cancelled,
    /// History needed to resume is gone; start over from a snapshot
    Compacted,
}

/// Drives a [`WatchHandler`] over one namespace
pub struct Replicator {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    bootstrap: BootstrapPolicy,
    reconnect: RetryPolicy,
    batch_pause: Option<Duration>,
    status: SyncStatus,
}

impl Replicator {
    pub fn new(store: Arc<dyn CoordinationStore>, prefix: String, status: SyncStatus) -> Self {
        Self {
            store,
            prefix,
            bootstrap: BootstrapPolicy::default(),
            reconnect: RetryPolicy::default(),
            batch_pause: None,
            status,
        }
    }

    pub fn with_bootstrap_policy(mut self, policy: BootstrapPolicy) -> Self {
        self.bootstrap = policy;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Pause after each watch notification
    pub fn with_batch_pause(mut self, pause: Option<Duration>) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Runs until shutdown or an unrecoverable error
    pub async fn run<H: WatchHandler>(
        &self,
        handler: &H,
        shutdown: &CancellationToken,
    ) -> Result<(), SyncError> {
        let result = self.replicate(handler, shutdown).await;

        match &result {
            Ok(()) => {
                info!("Watch on {} stopped", self.prefix);
                self.status.set_phase(SyncPhase::Stopped);
            }
            Err(e) => {
                error!("Watch on {} failed: {}", self.prefix, e);
                self.status.record_failure(e);
            }
        }

        result
    }

    async fn replicate<H: WatchHandler>(
        &self,
        handler: &H,
        shutdown: &CancellationToken,
    ) -> Result<(), SyncError> {
        'bootstrap: loop {
            self.status.set_phase(SyncPhase::Bootstrapping);

            let Some(snapshot) =
                acquire_snapshot(self.store.as_ref(), &self.prefix, &self.bootstrap, shutdown)
                    .await?
            else {
                return Ok(());
            };

            let mut revision = snapshot.revision;
            info!(
                "Loaded {} entries from {} at revision {}",
                snapshot.entries.len(),
                self.prefix,
                revision
            );

            let emitted = tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Ok(()),
                emitted = handler.on_snapshot(snapshot) => emitted,
            };
            self.status.record_emitted(emitted);
            self.status.record_revision(revision);

            loop {
                let stream = match self.resubscribe(revision, shutdown).await? {
                    Resubscribe::Subscribed(stream) => stream,
                    Resubscribe::Cancelled => return Ok(()),
                    Resubscribe::Compacted => {
                        warn!(
                            "Cannot resume {} after revision {}: history compacted, re-bootstrapping",
                            self.prefix, revision
                        );
                        continue 'bootstrap;
                    }
                };

                self.status.set_phase(SyncPhase::Streaming);
                debug!("Watching {} from revision {}", self.prefix, revision + 1);

                match self.consume(stream, handler, &mut revision, shutdown).await {
                    StreamEnd::Cancelled => return Ok(()),
                    StreamEnd::Closed => {
                        warn!(
                            "Watch on {} closed after revision {}, resubscribing",
                            self.prefix, revision
                        );
                        self.status.record_reconnect();
                    }
                }
            }
        }
    }

    /// Opens a watch resuming right after `revision`
    async fn resubscribe(
        &self,
        revision: Revision,
        shutdown: &CancellationToken,
    ) -> Result<Resubscribe, SyncError> {
        let operation = format!("Watch of {}", self.prefix);
        let outcome = retry(&self.reconnect, shutdown, &operation, || {
            self.store.watch(&self.prefix, revision + 1, true)
        })
        .await;

        match outcome {
            Ok(Some(stream)) => Ok(Resubscribe::Subscribed(stream)),
            Ok(None) => Ok(Resubscribe::Cancelled),
            Err(e) if e.source.is_compacted() => Ok(Resubscribe::Compacted),
            Err(e) => Err(SyncError::WatchClosed {
                prefix: self.prefix.clone(),
                revision,
                attempts: e.attempts,
                source: e.source,
            }),
        }
    }

    /// Feeds notifications to the handler until the stream ends
    ///
    /// `revision` is advanced only after a whole notification has been
    /// handled, so a resubscribe never skips part of a batch.
    async fn consume<H: WatchHandler>(
        &self,
        mut stream: WatchStream,
        handler: &H,
        revision: &mut Revision,
        shutdown: &CancellationToken,
    ) -> StreamEnd {
        loop {
            let response = tokio::select! {
                biased;

                _ = shutdown.cancelled() => return StreamEnd::Cancelled,
                response = stream.next() => response,
            };

            let Some(response) = response else {
                return StreamEnd::Closed;
            };

            if response.revision <= *revision {
                debug!(
                    "Skipping already processed revision {} on {}",
                    response.revision, self.prefix
                );
                continue;
            }

            let mut emitted = 0;
            for event in response.events {
                emitted += tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return StreamEnd::Cancelled,
                    emitted = handler.on_event(event) => emitted,
                };
            }

            *revision = response.revision;
            self.status.record_emitted(emitted);
            self.status.record_revision(response.revision);

            if let Some(pause) = self.batch_pause {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return StreamEnd::Cancelled,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
    }
}
