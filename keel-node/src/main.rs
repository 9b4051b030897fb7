//! Keel Node
//!
//! Runs the node-local control plane: the pipeline synchronizer and kill
//! watcher feed the scheduler queue, and the operator API exposes the
//! node's view plus the kill and pipeline write paths.
//!
//! Nodes share an etcd cluster when `KEEL_STORE_ENDPOINTS` is set; otherwise
//! the binary embeds an in-process coordination store.

use anyhow::{Context, Result};
use keel_node::api::{self, AppState};
use keel_node::config::Config;
use keel_node::scheduler::{ChannelSink, EventSink, PipelineTable, Scheduler};
use keel_node::service::{KillEmitter, PipelinePublisher};
use keel_node::signal;
use keel_node::sync::{KillRegistry, KillWatcher, PipelineSynchronizer, SyncError};
use keel_store::{CoordinationStore, EtcdStore, MemoryStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_node=info,keel_store=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keel Node");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: node_id={}, namespace_root={}, kill_ttl={:?}",
        config.node_id, config.namespace_root, config.kill_ttl
    );

    let shutdown = CancellationToken::new();
    signal::cancel_on_signal(shutdown.clone());

    let store = connect_store(&config).await?;
    let namespaces = config.namespaces();

    // Scheduler queue and consumer
    let (sink, queue) = ChannelSink::new(config.queue_capacity);
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let table = PipelineTable::new();
    let scheduler = Scheduler::new(config.node_id.clone(), table.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(queue, shutdown.clone()));

    // Watchers
    let synchronizer = PipelineSynchronizer::new(
        store.clone(),
        &namespaces,
        config.node_id.clone(),
        sink.clone(),
    )
    .with_bootstrap_policy(config.bootstrap_policy())
    .with_reconnect_policy(config.reconnect_policy())
    .with_batch_pause(config.batch_pause);

    let registry = KillRegistry::new();
    let watcher = KillWatcher::new(store.clone(), &namespaces, sink, registry.clone())
        .with_bootstrap_policy(config.bootstrap_policy())
        .with_reconnect_policy(config.reconnect_policy());

    let state = AppState {
        node_id: config.node_id.clone(),
        table,
        registry,
        watchers: vec![synchronizer.status(), watcher.status()],
        emitter: KillEmitter::new(store.clone(), namespaces.clone(), config.kill_ttl),
        publisher: PipelinePublisher::new(store, namespaces),
    };

    let sync_handle = spawn_watcher(shutdown.clone(), {
        let shutdown = shutdown.clone();
        async move { synchronizer.run(shutdown).await }
    });
    let killer_handle = spawn_watcher(shutdown.clone(), {
        let shutdown = shutdown.clone();
        async move { watcher.run(shutdown).await }
    });

    // Operator API
    let app = api::create_router(state);
    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    shutdown.cancel();

    // Wind down
    let mut failure = None;
    for handle in [sync_handle, killer_handle] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failure.get_or_insert(e);
            }
            Err(e) => error!("Watcher task panicked: {}", e),
        }
    }
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task panicked: {}", e);
    }

    served.context("API server failed")?;
    if let Some(e) = failure {
        return Err(e).context("Node stopped after a synchronization failure");
    }

    info!("Keel Node stopped");
    Ok(())
}

/// Connects to the shared store, or embeds one when no endpoints are set
async fn connect_store(config: &Config) -> Result<Arc<dyn CoordinationStore>> {
    if config.store_endpoints.is_empty() {
        info!("No store endpoints configured, using an in-process store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = EtcdStore::connect(&config.store_endpoints)
        .await
        .context("Failed to connect to the coordination store")?;
    Ok(Arc::new(store))
}

/// Runs a watcher, stopping the whole node if it fails
fn spawn_watcher<F>(shutdown: CancellationToken, run: F) -> JoinHandle<Result<(), SyncError>>
where
    F: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = run.await;
        if result.is_err() {
            shutdown.cancel();
        }
        result
    })
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("{}, using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
