//! Starting-revision acquisition and retry policies

use keel_store::{CoordinationStore, Snapshot, StoreError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::SyncError;

const INITIAL_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }

    /// A single attempt, no retry
    pub fn once() -> Self {
        Self::new(1)
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}

/// What to do when the starting snapshot cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// Give up after the first failure
    FailFast,
    /// Retry transient failures with backoff
    Retry(RetryPolicy),
}

impl BootstrapPolicy {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BootstrapPolicy::FailFast => RetryPolicy::once(),
            BootstrapPolicy::Retry(policy) => *policy,
        }
    }
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        BootstrapPolicy::Retry(RetryPolicy::default())
    }
}

/// Final failure of a retried store operation
#[derive(Debug)]
pub(crate) struct RetryExhausted {
    pub attempts: u32,
    pub source: StoreError,
}

/// Runs `attempt` until it succeeds, the policy is exhausted or shutdown
/// is requested
///
/// Only transient store errors are retried. Returns `Ok(None)` on shutdown.
pub(crate) async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    operation: &str,
    mut attempt: F,
) -> Result<Option<T>, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = keel_store::Result<T>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;

        let result = tokio::select! {
            biased;

            _ = shutdown.cancelled() => return Ok(None),
            result = attempt() => result,
        };

        match result {
            Ok(value) => {
                if attempts > 1 {
                    info!("{} succeeded after {} attempt(s)", operation, attempts);
                }
                return Ok(Some(value));
            }
            Err(source) if !source.is_transient() || attempts >= policy.max_attempts => {
                return Err(RetryExhausted { attempts, source });
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation, attempts, policy.max_attempts, e
                );
                warn!("Retrying in {:?}...", delay);

                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }

                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

/// Reads a consistent snapshot of `prefix` under the given policy
///
/// This is the single "acquire a starting revision" step shared by every
/// watcher. Returns `Ok(None)` if shutdown was requested first.
pub async fn acquire_snapshot(
    store: &dyn CoordinationStore,
    prefix: &str,
    policy: &BootstrapPolicy,
    shutdown: &CancellationToken,
) -> Result<Option<Snapshot>, SyncError> {
    let operation = format!("Snapshot of {}", prefix);

    retry(&policy.retry_policy(), shutdown, &operation, || {
        store.snapshot_prefix(prefix)
    })
    .await
    .map_err(|e| SyncError::Bootstrap {
        prefix: prefix.to_string(),
        attempts: e.attempts,
        source: e.source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_store::MemoryStore;

    #[tokio::test]
    async fn test_fail_fast_gives_up_after_one_attempt() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = acquire_snapshot(
            &store,
            "/keel/pipelines/",
            &BootstrapPolicy::FailFast,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            SyncError::Bootstrap {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 1);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_once_store_recovers() {
        let store = MemoryStore::new();
        store.put("/keel/pipelines/a", b"{}".to_vec(), None).await.unwrap();
        store.set_available(false);

        let recovering = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            recovering.set_available(true);
        });

        let snapshot = acquire_snapshot(
            &store,
            "/keel/pipelines/",
            &BootstrapPolicy::Retry(RetryPolicy::new(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_is_bounded() {
        let store = MemoryStore::new();
        store.set_available(false);

        let policy = RetryPolicy::new(3).with_delays(Duration::from_millis(10), Duration::from_millis(20));
        let err = acquire_snapshot(
            &store,
            "/keel/killer/",
            &BootstrapPolicy::Retry(policy),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Bootstrap { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry() {
        let store = MemoryStore::new();
        store.set_available(false);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = acquire_snapshot(
            &store,
            "/keel/killer/",
            &BootstrapPolicy::default(),
            &shutdown,
        )
        .await
        .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
        assert_eq!(BootstrapPolicy::FailFast.retry_policy(), RetryPolicy::once());
    }
}
