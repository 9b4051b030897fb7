//! Node configuration
//!
//! Defines all configurable parameters for the node agent including
//! namespace layout, kill-signal TTL, queue sizing and retry budgets.

use keel_core::keys::Namespaces;
use std::time::Duration;

use crate::sync::{BootstrapPolicy, RetryPolicy};

/// Node configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this node, matched against pipeline node lists
    pub node_id: String,

    /// Root under which the pipelines and killer namespaces live
    pub namespace_root: String,

    /// Address the operator API listens on
    pub bind_addr: String,

    /// Lifetime of a kill marker
    pub kill_ttl: Duration,

    /// Capacity of the scheduler event queue
    pub queue_capacity: usize,

    /// Optional pause after each watch batch of the pipeline synchronizer
    pub batch_pause: Option<Duration>,

    /// Snapshot attempts before bootstrap is considered failed (0 or 1 = fail fast)
    pub bootstrap_max_attempts: u32,

    /// Resubscribe attempts after a watch stream closes
    pub reconnect_max_attempts: u32,

    /// etcd endpoints shared by every node; empty runs an in-process store
    pub store_endpoints: Vec<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(node_id: String) -> Self {
        Self {
            node_id,
            namespace_root: "/keel".to_string(),
            bind_addr: "0.0.0.0:8090".to_string(),
            kill_ttl: Duration::from_secs(2),
            queue_capacity: 256,
            batch_pause: None,
            bootstrap_max_attempts: 10,
            reconnect_max_attempts: 10,
            store_endpoints: Vec::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_NODE_ID (required)
    /// - KEEL_NAMESPACE_ROOT (optional, default: /keel)
    /// - KEEL_BIND_ADDR (optional, default: 0.0.0.0:8090)
    /// - KEEL_KILL_TTL (optional, seconds, default: 2)
    /// - KEEL_QUEUE_CAPACITY (optional, default: 256)
    /// - KEEL_BATCH_PAUSE_MS (optional, milliseconds, default: none)
    /// - KEEL_BOOTSTRAP_MAX_ATTEMPTS (optional, default: 10)
    /// - KEEL_RECONNECT_MAX_ATTEMPTS (optional, default: 10)
    /// - KEEL_STORE_ENDPOINTS (optional, comma-separated etcd endpoints, default: in-process store)
    pub fn from_env() -> anyhow::Result<Self> {
        let node_id = std::env::var("KEEL_NODE_ID")
            .map_err(|_| anyhow::anyhow!("KEEL_NODE_ID environment variable not set"))?;

        let mut config = Self::new(node_id);

        if let Ok(root) = std::env::var("KEEL_NAMESPACE_ROOT") {
            config.namespace_root = root;
        }

        if let Ok(addr) = std::env::var("KEEL_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(ttl) = env_parse::<u64>("KEEL_KILL_TTL") {
            config.kill_ttl = Duration::from_secs(ttl);
        }

        if let Some(capacity) = env_parse::<usize>("KEEL_QUEUE_CAPACITY") {
            config.queue_capacity = capacity;
        }

        config.batch_pause = env_parse::<u64>("KEEL_BATCH_PAUSE_MS").map(Duration::from_millis);

        if let Some(attempts) = env_parse::<u32>("KEEL_BOOTSTRAP_MAX_ATTEMPTS") {
            config.bootstrap_max_attempts = attempts;
        }

        if let Some(attempts) = env_parse::<u32>("KEEL_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect_max_attempts = attempts;
        }

        if let Ok(endpoints) = std::env::var("KEEL_STORE_ENDPOINTS") {
            config.store_endpoints = parse_endpoints(&endpoints);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.trim().is_empty() {
            anyhow::bail!("node_id cannot be empty");
        }

        if !self.namespace_root.starts_with('/') || self.namespace_root.trim_matches('/').is_empty()
        {
            anyhow::bail!("namespace_root must be an absolute, non-root path (e.g. /keel)");
        }

        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.kill_ttl.is_zero() {
            anyhow::bail!("kill_ttl must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.reconnect_max_attempts == 0 {
            anyhow::bail!("reconnect_max_attempts must be at least 1");
        }

        Ok(())
    }

    /// Namespace layout under the configured root
    pub fn namespaces(&self) -> Namespaces {
        Namespaces::new(&self.namespace_root)
    }

    /// How watchers acquire their starting snapshot
    pub fn bootstrap_policy(&self) -> BootstrapPolicy {
        if self.bootstrap_max_attempts <= 1 {
            BootstrapPolicy::FailFast
        } else {
            BootstrapPolicy::Retry(RetryPolicy::new(self.bootstrap_max_attempts))
        }
    }

    /// How watchers resubscribe after their stream closes
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.reconnect_max_attempts)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Splits a comma-separated endpoint list, skipping blanks
fn parse_endpoints(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}
