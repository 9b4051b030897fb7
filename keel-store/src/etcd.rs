//! etcd-backed coordination store
//!
//! Maps the [`CoordinationStore`] operations onto the etcd v3 API. Each
//! watch runs on a forwarding task that splits etcd's batched responses
//! into one notification per revision.

use async_trait::async_trait;
use etcd_client::{
    Client, DeleteOptions, EventType, GetOptions, PutOptions, WatchOptions,
    WatchResponse as EtcdWatchResponse,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::CoordinationStore;
use crate::error::{Result, StoreError};
use crate::types::{
    KeyValue, LeaseId, Revision, Snapshot, WatchEvent, WatchEventKind, WatchResponse, WatchStream,
};

/// Coordination store client talking to an etcd cluster
///
/// Cloning is cheap; clones share the underlying connection.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connects to the cluster behind `endpoints`
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(StoreError::unavailable("no etcd endpoints configured"));
        }
        let client = Client::connect(endpoints, None).await.map_err(unavailable)?;
        info!(?endpoints, "Connected to etcd");
        Ok(Self { client })
    }

    /// Fails with [`StoreError::Compacted`] when `from_revision` can no longer
    /// be replayed
    ///
    /// etcd reports compaction on the watch stream after it has been created;
    /// reading the prefix at `from_revision - 1` surfaces it before handing a
    /// stream to the caller.
    async fn check_not_compacted(&self, prefix: &str, from_revision: Revision) -> Result<()> {
        if from_revision <= 1 {
            return Ok(());
        }
        let options = GetOptions::new()
            .with_prefix()
            .with_count_only()
            .with_revision(to_etcd(from_revision - 1));

        match self.client.kv_client().get(prefix, Some(options)).await {
            Ok(_) => Ok(()),
            Err(e) if is_compaction(&e.to_string()) => Err(StoreError::Compacted {
                requested: from_revision,
                // etcd does not report the compaction point here
                compacted: from_revision - 1,
            }),
            Err(e) => Err(unavailable(e)),
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn snapshot_prefix(&self, prefix: &str) -> Result<Snapshot> {
        let response = self
            .client
            .kv_client()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(unavailable)?;

        let entries = response
            .kvs()
            .iter()
            .map(|kv| {
                key_value(
                    kv.key(),
                    kv.value(),
                    kv.create_revision(),
                    kv.mod_revision(),
                    kv.lease(),
                )
            })
            .collect();

        Ok(Snapshot {
            entries,
            revision: response.header().map_or(0, |h| to_revision(h.revision())),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let response = self
            .client
            .kv_client()
            .get(key, None)
            .await
            .map_err(unavailable)?;

        Ok(response.kvs().first().map(|kv| {
            key_value(
                kv.key(),
                kv.value(),
                kv.create_revision(),
                kv.mod_revision(),
                kv.lease(),
            )
        }))
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
        with_prev_value: bool,
    ) -> Result<WatchStream> {
        let mut options = WatchOptions::new().with_prefix();
        if from_revision > 0 {
            self.check_not_compacted(prefix, from_revision).await?;
            options = options.with_start_revision(to_etcd(from_revision));
        }
        if with_prev_value {
            options = options.with_prev_key();
        }

        let (watcher, mut stream) = self
            .client
            .watch_client()
            .watch(prefix, Some(options))
            .await
            .map_err(unavailable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            // Dropping the watcher cancels the server-side watch
            let _watcher = watcher;
            loop {
                let message = tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.message() => message,
                };
                match message {
                    Ok(Some(response)) if response.canceled() => {
                        debug!(
                            %prefix,
                            compact_revision = response.compact_revision(),
                            "Watch cancelled by etcd"
                        );
                        break;
                    }
                    Ok(Some(response)) => {
                        for notification in split_by_revision(translate(&response, with_prev_value))
                        {
                            if tx.send(notification).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%prefix, error = %e, "Watch stream failed");
                        break;
                    }
                }
            }
        });

        Ok(WatchStream::new(rx))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId> {
        let response = self
            .client
            .lease_client()
            .grant(ttl_seconds(ttl), None)
            .await
            .map_err(unavailable)?;
        Ok(LeaseId(response.id() as u64))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        let (mut keeper, mut stream) = self
            .client
            .lease_client()
            .keep_alive(lease.0 as i64)
            .await
            .map_err(|e| lease_error(lease, e))?;
        keeper.keep_alive().await.map_err(|e| lease_error(lease, e))?;

        match stream.message().await.map_err(|e| lease_error(lease, e))? {
            // etcd answers an unknown lease with a zero TTL
            Some(response) if response.ttl() > 0 => Ok(()),
            Some(_) => Err(StoreError::LeaseNotFound(lease)),
            None => Err(StoreError::unavailable("keep-alive stream closed")),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        self.client
            .lease_client()
            .revoke(lease.0 as i64)
            .await
            .map_err(|e| lease_error(lease, e))?;
        Ok(())
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
        }

        let options = lease.map(|lease| PutOptions::new().with_lease(lease.0 as i64));
        let response = self
            .client
            .kv_client()
            .put(key, value, options)
            .await
            .map_err(|e| match lease {
                Some(lease) => lease_error(lease, e),
                None => unavailable(e),
            })?;

        Ok(response.header().map_or(0, |h| to_revision(h.revision())))
    }

    async fn delete(&self, key: &str) -> Result<Option<Revision>> {
        let response = self
            .client
            .kv_client()
            .delete(key, Some(DeleteOptions::new()))
            .await
            .map_err(unavailable)?;

        if response.deleted() == 0 {
            return Ok(None);
        }
        Ok(response.header().map(|h| to_revision(h.revision())))
    }
}

/// Converts one etcd watch response into store events
fn translate(response: &EtcdWatchResponse, with_prev_value: bool) -> Vec<WatchEvent> {
    response
        .events()
        .iter()
        .filter_map(|event| {
            let kv = event.kv()?;
            let kind = match event.event_type() {
                EventType::Put => WatchEventKind::Put,
                EventType::Delete => WatchEventKind::Delete,
            };
            let prev_kv = if with_prev_value {
                event.prev_kv().map(|prev| {
                    key_value(
                        prev.key(),
                        prev.value(),
                        prev.create_revision(),
                        prev.mod_revision(),
                        prev.lease(),
                    )
                })
            } else {
                None
            };
            Some(WatchEvent {
                kind,
                kv: key_value(
                    kv.key(),
                    kv.value(),
                    kv.create_revision(),
                    kv.mod_revision(),
                    kv.lease(),
                ),
                prev_kv,
            })
        })
        .collect()
}

/// Groups events into one notification per revision, keeping their order
///
/// etcd may batch several revisions into a single response.
fn split_by_revision(events: Vec<WatchEvent>) -> Vec<WatchResponse> {
    let mut responses: Vec<WatchResponse> = Vec::new();
    for event in events {
        match responses.last_mut() {
            Some(last) if last.revision == event.revision() => last.events.push(event),
            _ => responses.push(WatchResponse {
                revision: event.revision(),
                events: vec![event],
            }),
        }
    }
    responses
}

fn key_value(
    key: &[u8],
    value: &[u8],
    create_revision: i64,
    mod_revision: i64,
    lease: i64,
) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(key).into_owned(),
        value: value.to_vec(),
        create_revision: to_revision(create_revision),
        mod_revision: to_revision(mod_revision),
        // etcd uses 0 for "no lease"
        lease: (lease != 0).then_some(LeaseId(lease as u64)),
    }
}

fn to_revision(revision: i64) -> Revision {
    revision.max(0) as Revision
}

fn to_etcd(revision: Revision) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

/// Lease TTL in whole seconds, rounded up, at least one
fn ttl_seconds(ttl: Duration) -> i64 {
    let mut seconds = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        seconds += 1;
    }
    i64::try_from(seconds.max(1)).unwrap_or(i64::MAX)
}

fn is_compaction(message: &str) -> bool {
    message.contains("required revision has been compacted")
}

fn is_lease_not_found(message: &str) -> bool {
    message.contains("requested lease not found")
}

fn unavailable(error: etcd_client::Error) -> StoreError {
    StoreError::unavailable(error.to_string())
}

fn lease_error(lease: LeaseId, error: etcd_client::Error) -> StoreError {
    let message = error.to_string();
    if is_lease_not_found(&message) {
        StoreError::LeaseNotFound(lease)
    } else {
        StoreError::Unavailable(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: WatchEventKind, key: &str, revision: Revision) -> WatchEvent {
        WatchEvent {
            kind,
            kv: KeyValue {
                key: key.to_string(),
                value: Vec::new(),
                create_revision: revision,
                mod_revision: revision,
                lease: None,
            },
            prev_kv: None,
        }
    }

    #[test]
    fn test_batched_events_split_per_revision() {
        let responses = split_by_revision(vec![
            event(WatchEventKind::Put, "/p/a", 7),
            event(WatchEventKind::Delete, "/p/b", 8),
            event(WatchEventKind::Delete, "/p/c", 8),
            event(WatchEventKind::Put, "/p/a", 9),
        ]);

        let shape: Vec<_> = responses
            .iter()
            .map(|r| (r.revision, r.events.len()))
            .collect();
        assert_eq!(shape, vec![(7, 1), (8, 2), (9, 1)]);
        assert_eq!(responses[1].events[1].kv.key, "/p/c");
        assert!(split_by_revision(Vec::new()).is_empty());
    }

    #[test]
    fn test_key_value_conversion() {
        let kv = key_value(b"/keel/killer/p", b"", 3, 5, 0x1f);
        assert_eq!(kv.key, "/keel/killer/p");
        assert_eq!(kv.create_revision, 3);
        assert_eq!(kv.mod_revision, 5);
        assert_eq!(kv.lease, Some(LeaseId(0x1f)));

        let kv = key_value(b"/keel/pipelines/a", b"{}", 2, 2, 0);
        assert_eq!(kv.value, b"{}");
        assert!(kv.lease.is_none());
    }

    #[test]
    fn test_ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_seconds(Duration::from_secs(2)), 2);
        assert_eq!(ttl_seconds(Duration::from_millis(2500)), 3);
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn test_server_messages_are_classified() {
        assert!(is_compaction(
            "grpc request error: status: OutOfRange, message: \"etcdserver: mvcc: required revision has been compacted\""
        ));
        assert!(!is_compaction("transport error"));
        assert!(is_lease_not_found(
            "grpc request error: status: NotFound, message: \"etcdserver: requested lease not found\""
        ));
        assert!(!is_lease_not_found("etcdserver: request timed out"));
    }

    #[test]
    fn test_revision_conversion_clamps() {
        assert_eq!(to_revision(-1), 0);
        assert_eq!(to_revision(42), 42);
        assert_eq!(to_etcd(42), 42);
        assert_eq!(to_etcd(u64::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn test_connect_requires_endpoints() {
        let err = EtcdStore::connect(&[]).await.err().unwrap();
        assert!(err.is_transient());
    }
}
