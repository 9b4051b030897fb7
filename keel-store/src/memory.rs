//! In-process coordination store
//!
//! Keeps a bounded window of revision history so watches can resume from
//! any revision that has not been compacted. Revisions falling out of the
//! window are compacted on commit. All mutations, replays and watcher
//! registrations happen under one lock, which gives the same "no gap, no
//! duplicate" guarantee a real store provides between a snapshot at `R` and
//! a watch from `R + 1`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::CoordinationStore;
use crate::error::{Result, StoreError};
use crate::types::{
    KeyValue, LeaseId, Revision, Snapshot, WatchEvent, WatchEventKind, WatchResponse, WatchStream,
};

/// Revision-versioned key-value store living in the current process
///
/// Cloning is cheap; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) state: Arc<Mutex<State>>,
}

/// Revisions retained for watch replay by [`MemoryStore::new`]
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

pub(crate) struct State {
    revision: Revision,
    compacted: Revision,
    data: BTreeMap<String, KeyValue>,
    history: VecDeque<WatchResponse>,
    history_limit: usize,
    pub(crate) leases: HashMap<LeaseId, Lease>,
    next_lease: u64,
    watchers: Vec<Watcher>,
    available: bool,
}

pub(crate) struct Lease {
    pub(crate) ttl: Duration,
    pub(crate) deadline: Instant,
    keys: BTreeSet<String>,
}

struct Watcher {
    prefix: String,
    with_prev_value: bool,
    tx: mpsc::UnboundedSender<WatchResponse>,
}

enum Mutation {
    Put {
        key: String,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
}

impl MemoryStore {
    /// Creates an empty store at revision 0
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Creates an empty store that keeps at most `limit` revisions of
    /// history; older revisions are compacted as new ones are committed
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                revision: 0,
                compacted: 0,
                data: BTreeMap::new(),
                history: VecDeque::new(),
                history_limit: limit.max(1),
                leases: HashMap::new(),
                next_lease: 0,
                watchers: Vec::new(),
                available: true,
            })),
        }
    }

    /// Current store revision
    pub fn current_revision(&self) -> Revision {
        self.state.lock().revision
    }

    /// Oldest revision a watch can no longer resume from
    pub fn compacted_revision(&self) -> Revision {
        self.state.lock().compacted
    }

    /// Number of revisions retained for watch replay
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Number of open watch subscriptions
    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }

    /// Simulates an outage: while unavailable every request fails with
    /// [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Drops every open watch subscription, as a store restart would
    pub fn close_watchers(&self) {
        self.state.lock().watchers.clear();
    }

    /// Discards history up to and including `revision`
    ///
    /// Watches can no longer resume from a compacted revision.
    pub fn compact(&self, revision: Revision) {
        let mut state = self.state.lock();
        let revision = revision.min(state.revision);
        state.history.retain(|response| response.revision > revision);
        state.compacted = state.compacted.max(revision);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::unavailable("store is not serving requests"))
        }
    }

    /// Applies all mutations at a single new revision
    ///
    /// Returns `None` when nothing changed (e.g. deleting absent keys), in
    /// which case the revision does not move.
    fn commit(&mut self, mutations: Vec<Mutation>) -> Option<Revision> {
        let revision = self.revision + 1;
        let mut events = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            match mutation {
                Mutation::Put { key, value, lease } => {
                    let prev = self.data.get(&key).cloned();
                    if let Some(prev_lease) = prev.as_ref().and_then(|kv| kv.lease) {
                        self.detach(prev_lease, &key);
                    }
                    if let Some(lease) = lease.and_then(|id| self.leases.get_mut(&id)) {
                        lease.keys.insert(key.clone());
                    }

                    let kv = KeyValue {
                        key: key.clone(),
                        value,
                        create_revision: prev.as_ref().map_or(revision, |kv| kv.create_revision),
                        mod_revision: revision,
                        lease,
                    };
                    self.data.insert(key, kv.clone());
                    events.push(WatchEvent {
                        kind: WatchEventKind::Put,
                        kv,
                        prev_kv: prev,
                    });
                }
                Mutation::Delete { key } => {
                    let Some(prev) = self.data.remove(&key) else {
                        continue;
                    };
                    if let Some(prev_lease) = prev.lease {
                        self.detach(prev_lease, &key);
                    }
                    events.push(WatchEvent {
                        kind: WatchEventKind::Delete,
                        kv: KeyValue {
                            key,
                            value: Vec::new(),
                            create_revision: 0,
                            mod_revision: revision,
                            lease: None,
                        },
                        prev_kv: Some(prev),
                    });
                }
            }
        }

        if events.is_empty() {
            return None;
        }

        self.revision = revision;
        let response = WatchResponse { revision, events };
        self.watchers.retain(|watcher| match watcher.filter(&response) {
            Some(filtered) => watcher.tx.send(filtered).is_ok(),
            None => !watcher.tx.is_closed(),
        });
        self.history.push_back(response);
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.revision;
            }
        }

        Some(revision)
    }

    fn detach(&mut self, lease: LeaseId, key: &str) {
        if let Some(lease) = self.leases.get_mut(&lease) {
            lease.keys.remove(key);
        }
    }

    /// Removes a lease and deletes its keys in one revision
    pub(crate) fn revoke(&mut self, lease: LeaseId) -> Result<Option<Revision>> {
        let lease = self
            .leases
            .remove(&lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        let mutations = lease
            .keys
            .into_iter()
            .map(|key| Mutation::Delete { key })
            .collect();
        Ok(self.commit(mutations))
    }
}

impl Watcher {
    fn filter(&self, response: &WatchResponse) -> Option<WatchResponse> {
        let events: Vec<WatchEvent> = response
            .events
            .iter()
            .filter(|event| event.kv.key.starts_with(&self.prefix))
            .map(|event| {
                let mut event = event.clone();
                if !self.with_prev_value {
                    event.prev_kv = None;
                }
                event
            })
            .collect();

        if events.is_empty() {
            None
        } else {
            Some(WatchResponse {
                revision: response.revision,
                events,
            })
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn snapshot_prefix(&self, prefix: &str) -> Result<Snapshot> {
        let state = self.state.lock();
        state.check_available()?;

        let entries = state
            .data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect();

        Ok(Snapshot {
            entries,
            revision: state.revision,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.data.get(key).cloned())
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
        with_prev_value: bool,
    ) -> Result<WatchStream> {
        let mut state = self.state.lock();
        state.check_available()?;

        let from_revision = if from_revision == 0 {
            state.revision + 1
        } else {
            from_revision
        };
        if from_revision <= state.compacted {
            return Err(StoreError::Compacted {
                requested: from_revision,
                compacted: state.compacted,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher {
            prefix: prefix.to_string(),
            with_prev_value,
            tx,
        };

        for response in state
            .history
            .iter()
            .filter(|response| response.revision >= from_revision)
        {
            if let Some(filtered) = watcher.filter(response) {
                // The receiver is still in hand, so this cannot fail
                let _ = watcher.tx.send(filtered);
            }
        }
        state.watchers.push(watcher);

        Ok(WatchStream::new(rx))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId> {
        let id = {
            let mut state = self.state.lock();
            state.check_available()?;
            state.next_lease += 1;
            let id = LeaseId(state.next_lease);
            state.leases.insert(
                id,
                Lease {
                    ttl,
                    deadline: Instant::now() + ttl,
                    keys: BTreeSet::new(),
                },
            );
            id
        };

        self.spawn_reaper(id);
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.state.lock();
        state.check_available()?;
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        entry.deadline = Instant::now() + entry.ttl;
        Ok(())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.state.lock();
        state.check_available()?;
        state.revoke(lease)?;
        Ok(())
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
        }

        let mut state = self.state.lock();
        state.check_available()?;
        if let Some(lease) = lease {
            if !state.leases.contains_key(&lease) {
                return Err(StoreError::LeaseNotFound(lease));
            }
        }

        let mutation = Mutation::Put {
            key: key.to_string(),
            value,
            lease,
        };
        // A put always produces an event
        Ok(state.commit(vec![mutation]).unwrap_or(state.revision))
    }

    async fn delete(&self, key: &str) -> Result<Option<Revision>> {
        let mut state = self.state.lock();
        state.check_available()?;
        Ok(state.commit(vec![Mutation::Delete {
            key: key.to_string(),
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next(stream: &mut WatchStream) -> WatchResponse {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("watch notification timed out")
            .expect("watch stream closed")
    }

    #[tokio::test]
    async fn test_snapshot_is_prefix_scoped_and_ordered() {
        let store = MemoryStore::new();
        store.put("/a/2", b"two".to_vec(), None).await.unwrap();
        store.put("/a/1", b"one".to_vec(), None).await.unwrap();
        store.put("/b/1", b"other".to_vec(), None).await.unwrap();

        let snapshot = store.snapshot_prefix("/a/").await.unwrap();
        let keys: Vec<_> = snapshot.entries.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["/a/1", "/a/2"]);
        assert_eq!(snapshot.revision, 3);
    }

    #[tokio::test]
    async fn test_watch_resumes_after_snapshot_without_gap() {
        let store = MemoryStore::new();
        store.put("/p/a", b"a1".to_vec(), None).await.unwrap();
        let snapshot = store.snapshot_prefix("/p/").await.unwrap();

        // Committed between the snapshot and the watch
        store.put("/p/b", b"b1".to_vec(), None).await.unwrap();

        let mut watch = store
            .watch("/p/", snapshot.revision + 1, true)
            .await
            .unwrap();
        store.put("/p/a", b"a2".to_vec(), None).await.unwrap();

        let first = next(&mut watch).await;
        assert_eq!(first.revision, snapshot.revision + 1);
        assert_eq!(first.events[0].kv.key, "/p/b");
        assert!(first.events[0].prev_kv.is_none());

        let second = next(&mut watch).await;
        assert_eq!(second.events[0].kv.value, b"a2");
        assert_eq!(second.events[0].prev_kv.as_ref().unwrap().value, b"a1");
        assert_eq!(second.events[0].kv.create_revision, 1);
    }

    #[tokio::test]
    async fn test_delete_carries_previous_value() {
        let store = MemoryStore::new();
        store.put("/p/a", b"a1".to_vec(), None).await.unwrap();
        let mut with_prev = store.watch("/p/", 0, true).await.unwrap();
        let mut without_prev = store.watch("/p/", 0, false).await.unwrap();

        let revision = store.delete("/p/a").await.unwrap();
        assert_eq!(revision, Some(2));

        let event = &next(&mut with_prev).await.events[0];
        assert_eq!(event.kind, WatchEventKind::Delete);
        assert!(event.kv.value.is_empty());
        assert_eq!(event.prev_kv.as_ref().unwrap().value, b"a1");

        let event = &next(&mut without_prev).await.events[0];
        assert!(event.prev_kv.is_none());
    }

    #[tokio::test]
    async fn test_deleting_missing_key_does_not_bump_revision() {
        let store = MemoryStore::new();
        store.put("/p/a", b"a".to_vec(), None).await.unwrap();
        assert_eq!(store.delete("/p/missing").await.unwrap(), None);
        assert_eq!(store.current_revision(), 1);
    }

    #[tokio::test]
    async fn test_watch_ignores_other_prefixes() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/keel/killer/", 0, false).await.unwrap();

        store.put("/keel/pipelines/p", b"x".to_vec(), None).await.unwrap();
        store.put("/keel/killer/p", b"x".to_vec(), None).await.unwrap();

        let response = next(&mut watch).await;
        assert_eq!(response.revision, 2);
        assert_eq!(response.events.len(), 1);
        assert_eq!(response.events[0].kv.key, "/keel/killer/p");
    }

    #[tokio::test]
    async fn test_compacted_revision_is_rejected() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.put("/p/a", vec![i], None).await.unwrap();
        }
        store.compact(3);

        let err = store.watch("/p/", 2, false).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Compacted {
                requested: 2,
                compacted: 3
            }
        );
        assert!(err.is_compacted());

        let mut watch = store.watch("/p/", 4, false).await.unwrap();
        assert_eq!(next(&mut watch).await.revision, 4);
        assert_eq!(next(&mut watch).await.revision, 5);
    }

    #[tokio::test]
    async fn test_history_window_compacts_oldest_revisions() {
        let store = MemoryStore::with_history_limit(3);
        for i in 0..5 {
            store.put("/p/a", vec![i], None).await.unwrap();
        }

        assert_eq!(store.history_len(), 3);
        assert_eq!(store.compacted_revision(), 2);
        assert!(store.watch("/p/", 2, false).await.unwrap_err().is_compacted());

        let mut watch = store.watch("/p/", 3, false).await.unwrap();
        assert_eq!(next(&mut watch).await.revision, 3);
        assert_eq!(next(&mut watch).await.revision, 4);
        assert_eq!(next(&mut watch).await.revision, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_leases_do_not_grow_history() {
        let store = MemoryStore::with_history_limit(16);
        for i in 0..200 {
            let lease = store.grant_lease(Duration::from_secs(2)).await.unwrap();
            store
                .put(&format!("/k/{i}"), Vec::new(), Some(lease))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(3)).await;

        // One put and one expiry per lease
        assert_eq!(store.current_revision(), 400);
        assert!(store.snapshot_prefix("/k/").await.unwrap().entries.is_empty());
        assert_eq!(store.history_len(), 16);
        assert_eq!(store.compacted_revision(), 384);
        assert!(store.state.lock().leases.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_keys_expire() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/k/", 0, true).await.unwrap();

        let lease = store.grant_lease(Duration::from_secs(2)).await.unwrap();
        store.put("/k/p", b"kill".to_vec(), Some(lease)).await.unwrap();
        assert_eq!(store.get("/k/p").await.unwrap().unwrap().lease, Some(lease));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get("/k/p").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get("/k/p").await.unwrap().is_none());

        assert_eq!(next(&mut watch).await.events[0].kind, WatchEventKind::Put);
        let expired = next(&mut watch).await;
        assert_eq!(expired.events[0].kind, WatchEventKind::Delete);
        assert_eq!(expired.events[0].prev_kv.as_ref().unwrap().value, b"kill");

        assert_eq!(
            store.keep_alive(lease).await.unwrap_err(),
            StoreError::LeaseNotFound(lease)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_extends_lease() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(2)).await.unwrap();
        store.put("/k/p", Vec::new(), Some(lease)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        store.keep_alive(lease).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.get("/k/p").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get("/k/p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_deletes_all_keys_at_one_revision() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        store.put("/k/a", Vec::new(), Some(lease)).await.unwrap();
        store.put("/k/b", Vec::new(), Some(lease)).await.unwrap();
        let mut watch = store.watch("/k/", 0, false).await.unwrap();

        store.revoke_lease(lease).await.unwrap();

        let response = next(&mut watch).await;
        assert_eq!(response.revision, 3);
        assert_eq!(response.events.len(), 2);
        assert!(store.snapshot_prefix("/k/").await.unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn test_rebinding_key_detaches_old_lease() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        store.put("/k/a", Vec::new(), Some(lease)).await.unwrap();
        store.put("/k/a", b"plain".to_vec(), None).await.unwrap();

        store.revoke_lease(lease).await.unwrap();
        assert!(store.get("/k/a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_fails() {
        let store = MemoryStore::new();
        let err = store
            .put("/k/a", Vec::new(), Some(LeaseId(42)))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::LeaseNotFound(LeaseId(42)));
        assert_eq!(store.current_revision(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_requests() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(store.snapshot_prefix("/").await.unwrap_err().is_transient());
        assert!(store.grant_lease(Duration::from_secs(1)).await.is_err());
        assert!(store.put("/a", Vec::new(), None).await.is_err());

        store.set_available(true);
        assert!(store.snapshot_prefix("/").await.is_ok());
    }

    #[tokio::test]
    async fn test_close_watchers_ends_streams() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/", 0, false).await.unwrap();
        assert_eq!(store.watcher_count(), 1);

        store.close_watchers();
        assert!(watch.next().await.is_none());
        assert_eq!(store.watcher_count(), 0);
    }
}
