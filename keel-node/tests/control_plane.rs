//! End-to-end: publisher and emitter write to the store, the synchronizer
//! and kill watcher replicate into one queue, the scheduler applies it.

use keel_core::domain::event::EventType;
use keel_core::domain::pipeline::Pipeline;
use keel_core::keys::Namespaces;
use keel_node::scheduler::{ChannelSink, CollectingSink, EventSink, PipelineTable, Scheduler};
use keel_node::service::{KillEmitter, PipelinePublisher};
use keel_node::sync::{KillRegistry, KillWatcher, PipelineSynchronizer, SyncError, SyncPhase};
use async_trait::async_trait;
use keel_store::{
    CoordinationStore, KeyValue, LeaseId, MemoryStore, Revision, Snapshot, WatchStream,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Node {
    table: PipelineTable,
    registry: KillRegistry,
    synchronizer: Arc<PipelineSynchronizer>,
    watcher: Arc<KillWatcher>,
    handles: Vec<JoinHandle<Result<(), SyncError>>>,
    scheduler: JoinHandle<()>,
}

impl Node {
    fn start(store: &MemoryStore, node_id: &str, shutdown: &CancellationToken) -> Self {
        let store: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let namespaces = Namespaces::default();

        let (sink, queue) = ChannelSink::new(16);
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        let table = PipelineTable::new();
        let scheduler = tokio::spawn(
            Scheduler::new(node_id.to_string(), table.clone()).run(queue, shutdown.clone()),
        );

        let synchronizer = Arc::new(PipelineSynchronizer::new(
            store.clone(),
            &namespaces,
            node_id.to_string(),
            sink.clone(),
        ));
        let registry = KillRegistry::new();
        let watcher = Arc::new(KillWatcher::new(store, &namespaces, sink, registry.clone()));

        let handles = vec![
            tokio::spawn({
                let synchronizer = synchronizer.clone();
                let shutdown = shutdown.clone();
                async move { synchronizer.run(shutdown).await }
            }),
            tokio::spawn({
                let watcher = watcher.clone();
                let shutdown = shutdown.clone();
                async move { watcher.run(shutdown).await }
            }),
        ];

        Self {
            table,
            registry,
            synchronizer,
            watcher,
            handles,
            scheduler,
        }
    }

    async fn streaming(&self) {
        eventually(|| {
            self.synchronizer.status().phase() == SyncPhase::Streaming
                && self.watcher.status().phase() == SyncPhase::Streaming
        })
        .await;
    }

    async fn stop(self) {
        for handle in self.handles {
            handle.await.unwrap().unwrap();
        }
        self.scheduler.await.unwrap();
    }
}

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn stores(store: &MemoryStore) -> (PipelinePublisher, KillEmitter) {
    let store: Arc<dyn CoordinationStore> = Arc::new(store.clone());
    (
        PipelinePublisher::new(store.clone(), Namespaces::default()),
        KillEmitter::new(store, Namespaces::default(), Duration::from_secs(2)),
    )
}

#[tokio::test]
async fn test_bootstrap_then_membership_filtering() {
    let store = MemoryStore::new();
    let (publisher, _) = stores(&store);
    publisher
        .publish(Pipeline::new("a").with_nodes(["n1"]))
        .await
        .unwrap();
    publisher
        .publish(Pipeline::new("b").with_nodes(["n2"]))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let node = Node::start(&store, "n1", &shutdown);

    // The initial load carries every pipeline regardless of membership
    eventually(|| node.table.len() == 2).await;
    assert!(node.table.get("a").unwrap().bound);
    assert!(!node.table.get("b").unwrap().bound);
    node.streaming().await;

    // Later puts only arrive for pipelines bound to this node
    publisher
        .publish(Pipeline::new("c").with_nodes(["n2"]))
        .await
        .unwrap();
    publisher
        .publish(Pipeline::new("d").with_nodes(["n1", "n2"]))
        .await
        .unwrap();
    eventually(|| node.table.contains("d")).await;
    assert!(!node.table.contains("c"));

    // Deletes arrive regardless
    publisher.retract("b").await.unwrap();
    eventually(|| !node.table.contains("b")).await;

    shutdown.cancel();
    node.stop().await;
}

#[tokio::test]
async fn test_kill_reaches_scheduler_and_expires() {
    let store = MemoryStore::new();
    let (publisher, emitter) = stores(&store);
    publisher
        .publish(Pipeline::new("pipeline-123").with_nodes(["n1"]))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let node = Node::start(&store, "n1", &shutdown);
    eventually(|| node.table.contains("pipeline-123")).await;
    node.streaming().await;

    emitter.request_kill("pipeline-123").await.unwrap();
    eventually(|| {
        node.table
            .get("pipeline-123")
            .is_some_and(|p| p.kill_requested_at.is_some())
    })
    .await;
    assert!(node.registry.contains("pipeline-123"));

    // The marker lives for the lease TTL, then disappears on its own
    eventually(|| node.registry.is_empty()).await;
    assert!(
        store
            .get("/keel/killer/pipeline-123")
            .await
            .unwrap()
            .is_none()
    );

    shutdown.cancel();
    node.stop().await;
}

/// Store that commits a batch of pipeline writes right after the first
/// snapshot is read, before the caller can open its watch
#[derive(Clone)]
struct WritesAfterSnapshot {
    inner: MemoryStore,
    pending: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl CoordinationStore for WritesAfterSnapshot {
    async fn snapshot_prefix(&self, prefix: &str) -> keel_store::Result<Snapshot> {
        let snapshot = self.inner.snapshot_prefix(prefix).await?;
        let pending = std::mem::take(&mut *self.pending.lock());
        let (publisher, _) = stores(&self.inner);
        for id in pending {
            publisher
                .publish(Pipeline::new(id).with_nodes(["n1"]))
                .await
                .unwrap();
        }
        Ok(snapshot)
    }

    async fn get(&self, key: &str) -> keel_store::Result<Option<KeyValue>> {
        self.inner.get(key).await
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
        with_prev_value: bool,
    ) -> keel_store::Result<WatchStream> {
        self.inner.watch(prefix, from_revision, with_prev_value).await
    }

    async fn grant_lease(&self, ttl: Duration) -> keel_store::Result<LeaseId> {
        self.inner.grant_lease(ttl).await
    }

    async fn keep_alive(&self, lease: LeaseId) -> keel_store::Result<()> {
        self.inner.keep_alive(lease).await
    }

    async fn revoke_lease(&self, lease: LeaseId) -> keel_store::Result<()> {
        self.inner.revoke_lease(lease).await
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> keel_store::Result<Revision> {
        self.inner.put(key, value, lease).await
    }

    async fn delete(&self, key: &str) -> keel_store::Result<Option<Revision>> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_writes_between_snapshot_and_watch_are_delivered_once() {
    let store = MemoryStore::new();
    let (publisher, _) = stores(&store);
    for id in ["a", "b", "c"] {
        publisher
            .publish(Pipeline::new(id).with_nodes(["n1"]))
            .await
            .unwrap();
    }

    let sink = Arc::new(CollectingSink::new());
    let synchronizer = Arc::new(PipelineSynchronizer::new(
        Arc::new(WritesAfterSnapshot {
            inner: store.clone(),
            pending: Arc::new(Mutex::new(vec!["d", "e", "f"])),
        }),
        &Namespaces::default(),
        "n1".to_string(),
        sink.clone(),
    ));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let synchronizer = synchronizer.clone();
        let shutdown = shutdown.clone();
        async move { synchronizer.run(shutdown).await }
    });

    eventually(|| sink.len() >= 6).await;
    eventually(|| synchronizer.status().revision() == store.current_revision()).await;
    assert_eq!(store.current_revision(), 6);

    // Snapshot entries first, then the writes the watch replayed
    let ids: Vec<_> = sink
        .events()
        .iter()
        .inspect(|event| assert_eq!(event.kind, EventType::Put))
        .map(|event| event.pipeline_id().to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e", "f"]);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_nodes_share_one_store() {
    let store = MemoryStore::new();
    let (publisher, emitter) = stores(&store);
    let shutdown = CancellationToken::new();
    let n1 = Node::start(&store, "n1", &shutdown);
    let n2 = Node::start(&store, "n2", &shutdown);
    n1.streaming().await;
    n2.streaming().await;

    publisher
        .publish(Pipeline::new("a").with_nodes(["n1"]))
        .await
        .unwrap();
    eventually(|| n1.table.contains("a")).await;

    // Rebinding moves the pipeline to the other node's view
    publisher
        .bind_nodes("a", vec!["n2".to_string()])
        .await
        .unwrap();
    eventually(|| n2.table.contains("a")).await;

    // Kill markers reach every node
    emitter.request_kill("a").await.unwrap();
    eventually(|| n1.registry.contains("a") && n2.registry.contains("a")).await;

    shutdown.cancel();
    n1.stop().await;
    n2.stop().await;
}
