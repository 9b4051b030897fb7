//! Synchronization layer
//!
//! Replicates coordination-store namespaces into the node:
//! - `pipelines`: pipeline definitions, filtered by node membership
//! - `killer`: lease-bound kill markers, kept in a local registry
//!
//! Both run on the same [`Replicator`]: acquire a snapshot, hand it to the
//! handler, then stream changes from the snapshot revision onwards and
//! resubscribe from the last processed revision when the stream drops.

mod bootstrap;
pub mod killer;
pub mod pipelines;
mod replicator;
mod status;

pub use bootstrap::{BootstrapPolicy, RetryPolicy, acquire_snapshot};
pub use killer::{KillRegistry, KillWatcher};
pub use pipelines::PipelineSynchronizer;
pub use replicator::{Replicator, WatchHandler};
pub use status::{StatusReport, SyncPhase, SyncStatus};

use keel_store::{Revision, StoreError};
use thiserror::Error;

/// Errors that stop a watcher
///
/// Decode failures never show up here: they are logged and the entry is
/// skipped.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No starting snapshot could be acquired
    #[error("Bootstrap of {prefix} failed after {attempts} attempt(s): {source}")]
    Bootstrap {
        prefix: String,
        attempts: u32,
        source: StoreError,
    },

    /// The watch stream closed and every resubscribe attempt failed
    #[error(
        "Watch on {prefix} closed at revision {revision}, resubscribe failed after {attempts} attempt(s): {source}"
    )]
    WatchClosed {
        prefix: String,
        revision: Revision,
        attempts: u32,
        source: StoreError,
    },
}
