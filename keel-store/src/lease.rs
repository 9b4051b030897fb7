//! Lease expiry for the in-process store

use parking_lot::Mutex;
use std::sync::Weak;
use tokio::time::Instant;
use tracing::debug;

use crate::memory::{MemoryStore, State};
use crate::types::LeaseId;

impl MemoryStore {
    /// Spawns the task that revokes `lease` once its deadline passes
    ///
    /// The task holds a weak reference so a dropped store does not outlive
    /// its leases.
    pub(crate) fn spawn_reaper(&self, lease: LeaseId) {
        let state = std::sync::Arc::downgrade(&self.state);

        tokio::spawn(async move {
            while let Some(deadline) = expire_if_due(&state, lease) {
                tokio::time::sleep_until(deadline).await;
            }
        });
    }
}

/// Revokes the lease if its deadline has passed
///
/// Returns the deadline to wait for when the lease is still alive, `None`
/// once the lease is gone.
fn expire_if_due(state: &Weak<Mutex<State>>, lease: LeaseId) -> Option<Instant> {
    let state = state.upgrade()?;
    let mut state = state.lock();

    let deadline = state.leases.get(&lease)?.deadline;
    if deadline > Instant::now() {
        return Some(deadline);
    }

    match state.revoke(lease) {
        Ok(Some(revision)) => debug!(%lease, revision, "Lease expired, attached keys deleted"),
        Ok(None) => debug!(%lease, "Lease expired with no attached keys"),
        Err(_) => {}
    }
    None
}
