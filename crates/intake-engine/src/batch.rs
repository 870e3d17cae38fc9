//! Batched write coordination.
//!
//! Remote write operations are priced and rate-limited per call, so the
//! coordinator queues write/delete intents and commits them in bounded
//! batches: a debounce window collapses rapid edits from one interaction
//! into a single commit, and a full queue flushes immediately. Failed
//! batches go back to the *front* of the queue (oldest work retries first)
//! with bounded exponential backoff; nothing is ever silently dropped.

use crate::error::{ErrorKind, Result};
use crate::metrics::CostTracker;
use intake_config::EngineConfig;
use intake_remote::{BatchOperation, DocumentStoreHandle};
use intake_store::{CacheEntry, ContentStore};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct Inner {
    remote: DocumentStoreHandle,
    store: ContentStore,
    metrics: Arc<CostTracker>,
    queue: Mutex<VecDeque<BatchOperation>>,
    max_batch_size: usize,
    debounce: Duration,
    backoff_base: Duration,
    max_attempts: u32,
    remote_timeout: Duration,
    /// Incremented on every enqueue; a scheduled debounce flush only fires
    /// if no later enqueue superseded it.
    debounce_generation: AtomicU64,
}

/// Queues write intents and commits them in bounded batches.
///
/// Cloning is cheap; clones share one queue.
#[derive(Clone)]
pub struct BatchCoordinator {
    inner: Arc<Inner>,
}

impl BatchCoordinator {
    pub fn new(
        remote: DocumentStoreHandle,
        store: ContentStore,
        metrics: Arc<CostTracker>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                store,
                metrics,
                queue: Mutex::new(VecDeque::new()),
                max_batch_size: config.max_batch_size,
                debounce: config.debounce(),
                backoff_base: config.flush_backoff_base(),
                max_attempts: config.max_flush_attempts,
                remote_timeout: config.remote_timeout(),
                debounce_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Append an operation to the queue. Fire-and-forget: commit failures
    /// never surface here, only through metrics.
    ///
    /// Reaching the batch-size ceiling triggers a flush immediately;
    /// otherwise one is scheduled a debounce interval after the most recent
    /// enqueue.
    pub async fn enqueue(&self, op: BatchOperation) {
        let len = {
            let mut queue = self.inner.queue.lock().await;
            queue.push_back(op);
            queue.len()
        };
        let generation = self.inner.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.clone();
        if len >= self.inner.max_batch_size {
            tokio::spawn(async move {
                flush_with_backoff(inner).await;
            });
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(inner.debounce).await;
                if inner.debounce_generation.load(Ordering::SeqCst) != generation {
                    // A later enqueue restarted the window; let its task flush.
                    return;
                }
                flush_with_backoff(inner).await;
            });
        }
    }

    /// Commit one bounded batch right now.
    ///
    /// Takes at most `max_batch_size` operations off the queue and submits
    /// them as a single remote commit. On failure the operations return to
    /// the front of the queue and the error is reported to the caller.
    pub async fn flush(&self) -> Result<usize> {
        self.inner.flush_once().await
    }

    /// Flush repeatedly until the queue is empty.
    ///
    /// The shutdown guarantee: when this returns `Ok`, every pending write
    /// has been committed. An unreachable remote exhausts the retry budget
    /// and returns [`ErrorKind::RemoteUnavailable`] with the remaining
    /// operations still queued.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.inner.flush_once().await {
                Ok(0) => return Ok(()),
                Ok(_) => attempt = 0,
                Err(_) => {
                    attempt += 1;
                    if attempt >= self.inner.max_attempts {
                        self.inner.metrics.record_failed_commit();
                        exn::bail!(ErrorKind::RemoteUnavailable);
                    }
                    tokio::time::sleep(backoff_delay(self.inner.backoff_base, attempt)).await;
                },
            }
        }
    }

    /// Number of queued operations not yet committed.
    pub async fn pending(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

/// Auto-flush path for enqueue-triggered commits: bounded attempts, then a
/// terminal failure recorded in metrics with the operations retained for a
/// later explicit `flush`/`drain`.
async fn flush_with_backoff(inner: Arc<Inner>) {
    let mut attempt: u32 = 0;
    loop {
        match inner.flush_once().await {
            Ok(_) => return,
            Err(_) if attempt + 1 >= inner.max_attempts => {
                inner.metrics.record_failed_commit();
                let pending = inner.queue.lock().await.len();
                tracing::warn!(
                    attempts = attempt + 1,
                    pending,
                    "batch flush exhausted retries; operations retained in queue"
                );
                return;
            },
            Err(_) => {
                attempt += 1;
                tokio::time::sleep(backoff_delay(inner.backoff_base, attempt)).await;
            },
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16)).min(MAX_BACKOFF)
}

impl Inner {
    async fn flush_once(&self) -> Result<usize> {
        let batch: Vec<BatchOperation> = {
            let mut queue = self.queue.lock().await;
            let take = queue.len().min(self.max_batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        let outcome = tokio::time::timeout(self.remote_timeout, self.remote.batch_write(batch.clone())).await;
        let ack = match outcome {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) | Err(_) => {
                // Oldest pending work retries first: the taken operations go
                // back to the FRONT of the queue, in their original order.
                let mut queue = self.queue.lock().await;
                for op in batch.into_iter().rev() {
                    queue.push_front(op);
                }
                exn::bail!(ErrorKind::CommitFailed);
            },
        };

        let deletes = batch.iter().filter(|op| op.is_delete()).count() as u64;
        self.metrics.record_batch_commit();
        self.metrics.record_writes(count as u64 - deletes);
        self.metrics.record_deletes(deletes);
        tracing::debug!(count, "batch committed");

        // Optimistic local updates. The remote already accepted the batch,
        // so a content store hiccup here must not fail the flush; the sync
        // listener will reconcile whatever we miss.
        for op in &batch {
            let result = match op {
                BatchOperation::Set { target, payload } => {
                    self.store
                        .put(CacheEntry::fresh(target.clone(), payload.clone(), ack.version, ack.remote_timestamp))
                        .await
                },
                BatchOperation::Update { target, .. } => {
                    // The patched document's full contents are unknown
                    // locally; flag it for reconciliation instead of guessing.
                    self.store.mark_dirty(target).await.map(|_| ())
                },
                BatchOperation::Delete { target } => self.store.delete(target).await,
            };
            if let Err(error) = result {
                tracing::warn!(target = op.target(), %error, "optimistic cache update failed after commit");
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_config::CostConfig;
    use intake_remote::{DocumentStore, MockDocumentStore};
    use intake_store::Database;

    async fn fixture(config: EngineConfig) -> (BatchCoordinator, Arc<MockDocumentStore>, Arc<CostTracker>, ContentStore) {
        let remote = Arc::new(MockDocumentStore::new());
        let store = ContentStore::new(Database::connect_in_memory().await.unwrap());
        let metrics = Arc::new(CostTracker::new(CostConfig::default()));
        let coordinator = BatchCoordinator::new(remote.clone(), store.clone(), metrics.clone(), &config);
        (coordinator, remote, metrics, store)
    }

    fn quiet_config() -> EngineConfig {
        // Long debounce so only explicit flushes commit
        EngineConfig {
            debounce_ms: 60_000,
            flush_backoff_base_ms: 1,
            ..Default::default()
        }
    }

    fn set(n: usize) -> BatchOperation {
        BatchOperation::Set { target: format!("applications/{n}"), payload: format!("doc-{n}").into_bytes() }
    }

    #[tokio::test]
    async fn test_flush_commits_queued_ops() {
        let (coordinator, remote, metrics, store) = fixture(quiet_config()).await;
        coordinator.enqueue(set(1)).await;
        coordinator.enqueue(set(2)).await;
        let committed = coordinator.flush().await.unwrap();
        assert_eq!(committed, 2);
        assert_eq!(remote.batch_commit_count(), 1);
        assert_eq!(metrics.snapshot().writes, 2);
        // Optimistic update landed locally as fresh entries
        let entry = store.get("applications/1").await.unwrap().unwrap();
        assert_eq!(entry.payload, b"doc-1");
        assert!(!entry.is_dirty);
    }

    #[tokio::test]
    async fn test_501_ops_commit_in_exactly_two_batches() {
        let (coordinator, remote, _, _) = fixture(quiet_config()).await;
        for n in 0..501 {
            coordinator.enqueue(set(n)).await;
        }
        coordinator.drain().await.unwrap();
        assert_eq!(remote.batch_commit_count(), 2, "expected one full batch of 500 plus one of 1");
        assert_eq!(coordinator.pending().await, 0);
    }

    #[tokio::test]
    async fn test_flush_never_exceeds_max_batch_size() {
        let config = EngineConfig { max_batch_size: 10, ..quiet_config() };
        let (coordinator, _, _, _) = fixture(config).await;
        for n in 0..9 {
            coordinator.enqueue(set(n)).await;
        }
        // Below the ceiling: nothing committed yet, one bounded flush takes
        // at most max_batch_size
        let committed = coordinator.flush().await.unwrap();
        assert_eq!(committed, 9);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_at_front_in_order() {
        let (coordinator, remote, _, _) = fixture(quiet_config()).await;
        coordinator.enqueue(set(1)).await;
        coordinator.enqueue(set(2)).await;
        remote.fail_next_batches(1);
        let err = coordinator.flush().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CommitFailed));
        assert_eq!(coordinator.pending().await, 2, "no operation may be silently dropped");
        // Next flush retries the same ops, oldest first
        let committed = coordinator.flush().await.unwrap();
        assert_eq!(committed, 2);
        let doc = remote.read("applications/1").await.unwrap();
        assert!(doc.is_some());
    }

    #[tokio::test]
    async fn test_debounced_flush_fires_without_explicit_call() {
        let config = EngineConfig { debounce_ms: 20, ..Default::default() };
        let (coordinator, remote, _, _) = fixture(config).await;
        coordinator.enqueue(set(1)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(remote.batch_commit_count(), 1);
        assert_eq!(coordinator.pending().await, 0);
    }

    #[tokio::test]
    async fn test_drain_empty_queue_is_a_noop() {
        let (coordinator, remote, _, _) = fixture(quiet_config()).await;
        coordinator.drain().await.unwrap();
        assert_eq!(remote.batch_commit_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_reports_exhaustion_and_keeps_ops() {
        let config = EngineConfig { max_flush_attempts: 2, ..quiet_config() };
        let (coordinator, remote, metrics, _) = fixture(config).await;
        coordinator.enqueue(set(1)).await;
        remote.set_offline(true);
        let err = coordinator.drain().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::RemoteUnavailable));
        assert_eq!(metrics.snapshot().failed_commits, 1);
        assert_eq!(coordinator.pending().await, 1);
        // Remote recovers; an explicit drain finishes the job
        remote.set_offline(false);
        coordinator.drain().await.unwrap();
        assert_eq!(coordinator.pending().await, 0);
    }

    #[tokio::test]
    async fn test_update_marks_entry_dirty_after_commit() {
        let (coordinator, _, _, store) = fixture(quiet_config()).await;
        store
            .put(CacheEntry::fresh("applications/1", b"old".to_vec(), 1, time::OffsetDateTime::now_utc()))
            .await
            .unwrap();
        coordinator
            .enqueue(BatchOperation::Update {
                target: "applications/1".into(),
                patch: serde_json::json!({"status": "submitted"}),
            })
            .await;
        coordinator.flush().await.unwrap();
        assert!(store.get("applications/1").await.unwrap().unwrap().is_dirty);
    }

    #[tokio::test]
    async fn test_delete_removes_local_entry() {
        let (coordinator, _, metrics, store) = fixture(quiet_config()).await;
        store
            .put(CacheEntry::fresh("applications/1", b"x".to_vec(), 1, time::OffsetDateTime::now_utc()))
            .await
            .unwrap();
        coordinator.enqueue(BatchOperation::Delete { target: "applications/1".into() }).await;
        coordinator.flush().await.unwrap();
        assert!(store.get("applications/1").await.unwrap().is_none());
        assert_eq!(metrics.snapshot().deletes, 1);
    }
}
