//! Remote change subscription.
//!
//! Each subscription runs a background task that consumes the remote change
//! stream for one document and folds it into the content store. Timestamps
//! decide everything: a change is applied only when its remote timestamp is
//! *strictly* newer than the cached entry's, which makes redelivery and
//! out-of-order delivery idempotent. An in-band transport error marks the
//! entry dirty and triggers a one-shot reconciliation once the stream
//! resumes delivering.

use crate::error::{ErrorKind, Result};
use crate::metrics::CostTracker;
use exn::ResultExt as _;
use futures::StreamExt;
use intake_remote::{DocumentStoreHandle, RemoteChange};
use intake_store::{CacheEntry, ContentStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Invoked after a change has actually been applied to the local cache.
/// Superseded or redelivered changes never reach the callback.
pub type ChangeCallback = Box<dyn Fn(&RemoteChange) + Send + Sync>;

/// Spawns and owns per-document subscription tasks.
#[derive(Clone)]
pub struct SyncListener {
    remote: DocumentStoreHandle,
    store: ContentStore,
    metrics: Arc<CostTracker>,
    remote_timeout: Duration,
}

/// A live subscription. Dropping the handle (or calling
/// [`SubscriptionHandle::unsubscribe`]) stops the background task; the
/// handle cannot be reused afterwards.
pub struct SubscriptionHandle {
    path: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stop listening. After this returns no further changes are applied
    /// for this subscription.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SyncListener {
    pub fn new(
        remote: DocumentStoreHandle,
        store: ContentStore,
        metrics: Arc<CostTracker>,
        remote_timeout: Duration,
    ) -> Self {
        Self { remote, store, metrics, remote_timeout }
    }

    /// Subscribe to remote changes for `path`, folding them into the store.
    pub async fn subscribe(&self, path: &str) -> Result<SubscriptionHandle> {
        self.subscribe_with(path, None).await
    }

    /// Subscribe with a callback invoked for each change that wins the
    /// timestamp comparison and lands in the cache.
    pub async fn subscribe_with(&self, path: &str, callback: Option<ChangeCallback>) -> Result<SubscriptionHandle> {
        let mut stream = self.remote.subscribe(path).await.or_raise(|| ErrorKind::RemoteUnavailable)?;
        let path = path.to_string();
        let worker_path = path.clone();
        let store = self.store.clone();
        let remote = self.remote.clone();
        let metrics = self.metrics.clone();
        let remote_timeout = self.remote_timeout;
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(change) => match apply_change(&store, &change).await {
                        Ok(true) => {
                            if let Some(callback) = &callback {
                                callback(&change);
                            }
                        },
                        Ok(false) => {
                            tracing::debug!(path = change.path, "skipped stale or redelivered change");
                        },
                        Err(error) => {
                            tracing::warn!(path = change.path, %error, "failed to apply remote change");
                        },
                    },
                    Err(error) => {
                        // The stream survived but dropped updates; the cached
                        // entry can no longer be trusted until reconciled.
                        tracing::warn!(path = worker_path, %error, "transport error on change stream");
                        if let Err(error) = store.mark_dirty(&worker_path).await {
                            tracing::warn!(path = worker_path, %error, "failed to mark entry dirty");
                            continue;
                        }
                        if let Err(error) = reconcile_entry(&store, &remote, &metrics, &worker_path, remote_timeout).await {
                            tracing::warn!(path = worker_path, %error, "reconciliation failed; entry stays dirty");
                        }
                    },
                }
            }
            tracing::debug!(path = worker_path, "change stream ended");
        });
        Ok(SubscriptionHandle { path, task })
    }
}

/// Fold one remote change into the store. Returns `true` when the change was
/// applied, `false` when the cached entry was already at least as new.
async fn apply_change(store: &ContentStore, change: &RemoteChange) -> Result<bool> {
    if let Some(entry) = store.get(&change.path).await.or_raise(|| ErrorKind::Store)? {
        // Strictly-greater: an equal timestamp means this exact update is
        // already cached (redelivery), so applying it again is a no-op.
        if change.remote_timestamp <= entry.last_remote_update {
            return Ok(false);
        }
    }
    store
        .put(CacheEntry::fresh(
            change.path.clone(),
            change.payload.clone(),
            change.version,
            change.remote_timestamp,
        ))
        .await
        .or_raise(|| ErrorKind::Store)?;
    Ok(true)
}

/// Bring one cached entry back in line with the remote.
///
/// Three outcomes: a strictly newer remote document replaces the entry, an
/// equal-or-older one merely clears the dirty flag (the cache was right all
/// along), and a missing remote document deletes the local entry.
#[instrument(skip(store, remote, metrics, remote_timeout))]
pub(crate) async fn reconcile_entry(
    store: &ContentStore,
    remote: &DocumentStoreHandle,
    metrics: &CostTracker,
    path: &str,
    remote_timeout: Duration,
) -> Result<()> {
    let outcome = tokio::time::timeout(remote_timeout, remote.read(path)).await;
    let doc = match outcome {
        Ok(Ok(doc)) => doc,
        Ok(Err(_)) | Err(_) => exn::bail!(ErrorKind::RemoteUnavailable),
    };
    metrics.record_reads(1);
    let Some(doc) = doc else {
        // Deleted remotely; the cache must not resurrect it.
        tracing::debug!(path, "document gone from remote, dropping cached entry");
        return store.delete(path).await.or_raise(|| ErrorKind::Store);
    };
    let local = store.get(path).await.or_raise(|| ErrorKind::Store)?;
    let remote_is_newer = match &local {
        Some(entry) => doc.remote_timestamp > entry.last_remote_update,
        None => true,
    };
    if remote_is_newer {
        store
            .put(CacheEntry::fresh(path, doc.payload, doc.version, doc.remote_timestamp))
            .await
            .or_raise(|| ErrorKind::Store)?;
    } else {
        store.clear_dirty(path).await.or_raise(|| ErrorKind::Store)?;
    }
    Ok(())
}
