//! Keel coordination store client
//!
//! A small, strongly typed client interface to a revision-versioned
//! key-value store (etcd-like). The node agent only depends on the
//! [`CoordinationStore`] trait, which provides:
//! - Consistent prefix reads that report the revision they were served at
//! - Revision-bounded watches with optional previous values
//! - TTL leases and lease-bound keys
//!
//! [`EtcdStore`] talks to an etcd cluster and is what nodes share in a
//! deployment. [`MemoryStore`] is an in-process implementation with the
//! same semantics, used by the standalone node and by tests.
//!
//! # Example
//!
//! ```
//! use keel_store::{CoordinationStore, MemoryStore};
//!
//! # #[tokio::main]
//! # async fn main() -> keel_store::Result<()> {
//! let store = MemoryStore::new();
//! store.put("/keel/pipelines/a", b"{}".to_vec(), None).await?;
//!
//! let snapshot = store.snapshot_prefix("/keel/pipelines/").await?;
//! assert_eq!(snapshot.entries.len(), 1);
//!
//! // Resume right after the snapshot: nothing is missed, nothing repeats
//! let mut watch = store.watch("/keel/pipelines/", snapshot.revision + 1, true).await?;
//! store.delete("/keel/pipelines/a").await?;
//! let response = watch.next().await.unwrap();
//! assert_eq!(response.events.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod etcd;
mod lease;
mod memory;
pub mod types;

pub use error::{Result, StoreError};
pub use etcd::EtcdStore;
pub use memory::{DEFAULT_HISTORY_LIMIT, MemoryStore};
pub use types::{
    KeyValue, LeaseId, Revision, Snapshot, WatchEvent, WatchEventKind, WatchResponse, WatchStream,
};

use async_trait::async_trait;
use std::time::Duration;

/// Client interface to the coordination store
///
/// Implementations must be safe to share between tasks; several watch
/// subscriptions may be open on one handle at the same time.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Reads every key under `prefix` at a single consistent revision
    async fn snapshot_prefix(&self, prefix: &str) -> Result<Snapshot>;

    /// Reads a single key
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// Subscribes to changes under `prefix`
    ///
    /// Every change with a revision `>= from_revision` is delivered exactly
    /// once, in revision order. `from_revision == 0` starts at the next
    /// change. Fails with [`StoreError::Compacted`] when the history needed
    /// to honour `from_revision` is gone.
    ///
    /// # Arguments
    /// * `prefix` - Key prefix to watch
    /// * `from_revision` - First revision to deliver
    /// * `with_prev_value` - Attach the previous key state to each change
    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
        with_prev_value: bool,
    ) -> Result<WatchStream>;

    /// Grants a lease that expires after `ttl` unless kept alive
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId>;

    /// Extends a lease by its original TTL
    async fn keep_alive(&self, lease: LeaseId) -> Result<()>;

    /// Revokes a lease, deleting every key attached to it
    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;

    /// Writes a key, optionally bound to a lease
    ///
    /// # Returns
    /// The revision of the write
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision>;

    /// Deletes a key
    ///
    /// # Returns
    /// The revision of the deletion, or `None` if the key did not exist
    async fn delete(&self, key: &str) -> Result<Option<Revision>>;
}
