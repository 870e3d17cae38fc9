//! The cache engine facade.
//!
//! [`CacheEngine`] wires the content store, batch coordinator, sync listener
//! and query cache together behind one API. Callers never talk to the remote
//! directly; every read funnels through the cache layers and every write
//! through the batch queue, which is what keeps remote operation counts (and
//! the bill) down.

use crate::batch::BatchCoordinator;
use crate::error::{ErrorKind, Result};
use crate::listener::{ChangeCallback, SubscriptionHandle, SyncListener, reconcile_entry};
use crate::metrics::{CostMetrics, CostTracker};
use crate::query::QueryCache;
use exn::ResultExt as _;
use intake_archive::{ArchiveInput, ArchiveManifest, UnpackedArchive, content_type_for_name, pack, unpack};
use intake_config::EngineConfig;
use intake_remote::{BatchOperation, BlobStoreHandle, DocumentStoreHandle, QueryShape, Record};
use intake_store::{CacheEntry, ContentStore, Database};
use std::sync::Arc;
use std::time::Duration;
use time::Date;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::instrument;

/// A cached document as served to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentData {
    pub bytes: Vec<u8>,
    /// Derived from the document path's extension, never caller-declared.
    pub content_type: &'static str,
    /// `true` when the entry is dirty and the remote could not be reached to
    /// reconcile it; the caller sees the last known contents.
    pub stale: bool,
}

/// A packed archive that has been uploaded to blob storage.
#[derive(Debug, Clone)]
pub struct ArchiveUpload {
    pub url: String,
    pub manifest: ArchiveManifest,
}

/// Client-side document cache and synchronization engine.
///
/// Construct once per data directory and share behind an `Arc`. Dropping the
/// engine without [`CacheEngine::shutdown`] leaves queued writes uncommitted.
pub struct CacheEngine {
    store: ContentStore,
    db: Database,
    remote: DocumentStoreHandle,
    blobs: BlobStoreHandle,
    metrics: Arc<CostTracker>,
    batch: BatchCoordinator,
    listener: SyncListener,
    queries: QueryCache,
    remote_timeout: Duration,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheEngine {
    /// Open the engine against the configured database path.
    pub async fn open(config: &EngineConfig, remote: DocumentStoreHandle, blobs: BlobStoreHandle) -> Result<Self> {
        let db = Database::connect(config.db_path().or_raise(|| ErrorKind::Store)?)
            .await
            .or_raise(|| ErrorKind::Store)?;
        Ok(Self::with_database(config, db, remote, blobs))
    }

    /// Build the engine on an already-open database. Background maintenance
    /// (expired-entry sweep, dirty-entry reconciliation) starts immediately.
    pub fn with_database(
        config: &EngineConfig,
        db: Database,
        remote: DocumentStoreHandle,
        blobs: BlobStoreHandle,
    ) -> Self {
        let store = ContentStore::new(db.clone());
        let metrics = Arc::new(CostTracker::new(config.cost.clone()));
        let batch = BatchCoordinator::new(remote.clone(), store.clone(), metrics.clone(), config);
        let listener = SyncListener::new(remote.clone(), store.clone(), metrics.clone(), config.remote_timeout());
        let queries = QueryCache::new(remote.clone(), metrics.clone(), config.query_ttl(), config.remote_timeout());
        let maintenance = Mutex::new(spawn_maintenance(config, store.clone(), remote.clone(), metrics.clone()));
        Self {
            store,
            db,
            remote,
            blobs,
            metrics,
            batch,
            listener,
            queries,
            remote_timeout: config.remote_timeout(),
            maintenance,
        }
    }

    /// Fetch one document, serving from the cache whenever its entry can be
    /// trusted.
    ///
    /// A fresh entry is served without touching the remote. A dirty entry is
    /// reconciled first; if the remote is unreachable the last known contents
    /// come back with `stale` set. A full miss goes to the remote and caches
    /// the result.
    #[instrument(skip(self))]
    pub async fn get_document(&self, path: &str) -> Result<DocumentData> {
        if let Some(entry) = self.store.get(path).await.or_raise(|| ErrorKind::Store)? {
            if !entry.is_dirty {
                self.metrics.record_cache_hit();
                return Ok(DocumentData {
                    content_type: content_type_for_name(path),
                    bytes: entry.payload,
                    stale: false,
                });
            }
            match reconcile_entry(&self.store, &self.remote, &self.metrics, path, self.remote_timeout).await {
                Ok(()) => {
                    let Some(entry) = self.store.get(path).await.or_raise(|| ErrorKind::Store)? else {
                        // Reconciliation learned the remote deleted it.
                        exn::bail!(ErrorKind::NotFound(path.to_string()));
                    };
                    self.metrics.record_cache_hit();
                    return Ok(DocumentData {
                        content_type: content_type_for_name(path),
                        bytes: entry.payload,
                        stale: false,
                    });
                },
                Err(error) => {
                    tracing::warn!(path, %error, "reconciliation failed, serving stale entry");
                    self.metrics.record_cache_hit();
                    return Ok(DocumentData {
                        content_type: content_type_for_name(path),
                        bytes: entry.payload,
                        stale: true,
                    });
                },
            }
        }

        self.metrics.record_cache_miss();
        let outcome = tokio::time::timeout(self.remote_timeout, self.remote.read(path)).await;
        let doc = match outcome {
            Ok(Ok(doc)) => doc,
            Ok(Err(_)) | Err(_) => exn::bail!(ErrorKind::RemoteUnavailable),
        };
        self.metrics.record_reads(1);
        let Some(doc) = doc else {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        };
        self.store
            .put(CacheEntry::fresh(path, doc.payload.clone(), doc.version, doc.remote_timestamp))
            .await
            .or_raise(|| ErrorKind::Store)?;
        Ok(DocumentData { content_type: content_type_for_name(path), bytes: doc.payload, stale: false })
    }

    /// Run a list/query, served from the query result cache when possible.
    /// Returns the records plus whether they came from cache.
    pub async fn list_documents(&self, shape: &QueryShape) -> Result<(Vec<Record>, bool)> {
        self.queries.get(shape).await
    }

    /// Queue a write for the next batch commit. Fire-and-forget.
    ///
    /// Cached query results for the target's collection are invalidated
    /// immediately, before the write even commits, so a follow-up list never
    /// shows the pre-write state as "fresh".
    pub async fn enqueue_write(&self, op: BatchOperation) {
        match op.target().rsplit_once('/') {
            Some((collection, _)) => self.queries.invalidate(Some(collection)).await,
            None => self.queries.invalidate(None).await,
        }
        self.batch.enqueue(op).await;
    }

    /// Commit one bounded batch of queued writes right now.
    pub async fn flush(&self) -> Result<usize> {
        self.batch.flush().await
    }

    /// Flush until the write queue is empty, retrying with backoff. The
    /// guarantee callers rely on before process exit.
    pub async fn drain(&self) -> Result<()> {
        self.batch.drain().await
    }

    /// Subscribe to remote changes for one document path.
    pub async fn subscribe(&self, path: &str) -> Result<SubscriptionHandle> {
        self.listener.subscribe(path).await
    }

    /// Subscribe with a callback fired for each change that lands in the
    /// cache.
    pub async fn subscribe_with(&self, path: &str, callback: ChangeCallback) -> Result<SubscriptionHandle> {
        self.listener.subscribe_with(path, Some(callback)).await
    }

    /// Pack documents into a standardized archive and upload it to blob
    /// storage.
    #[instrument(skip(self, inputs), fields(count = inputs.len(), destination))]
    pub async fn archive_and_upload(
        &self,
        inputs: &[ArchiveInput],
        built_on: Date,
        destination: &str,
    ) -> Result<ArchiveUpload> {
        let (bytes, manifest) = pack(inputs, built_on).or_raise(|| ErrorKind::Archive)?;
        let outcome =
            tokio::time::timeout(self.remote_timeout, self.blobs.upload(destination, bytes, "application/gzip")).await;
        let url = match outcome {
            Ok(Ok(url)) => url,
            Ok(Err(_)) | Err(_) => exn::bail!(ErrorKind::RemoteUnavailable),
        };
        Ok(ArchiveUpload { url, manifest })
    }

    /// Download an archive from blob storage and unpack it.
    pub async fn fetch_archive(&self, url: &str) -> Result<UnpackedArchive> {
        let outcome = tokio::time::timeout(self.remote_timeout, self.blobs.download(url)).await;
        let bytes = match outcome {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(_)) | Err(_) => exn::bail!(ErrorKind::RemoteUnavailable),
        };
        unpack(&bytes).or_raise(|| ErrorKind::Archive)
    }

    /// Point-in-time metrics snapshot.
    pub fn get_metrics(&self) -> CostMetrics {
        self.metrics.snapshot()
    }

    /// Number of writes queued but not yet committed.
    pub async fn pending_writes(&self) -> usize {
        self.batch.pending().await
    }

    /// Stop maintenance, commit every queued write, and close the store.
    ///
    /// Returns [`ErrorKind::RemoteUnavailable`] if the remote stayed
    /// unreachable past the retry budget; queued writes survive in memory
    /// only, so callers should retry the drain before exiting.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        for task in self.maintenance.lock().await.drain(..) {
            task.abort();
        }
        self.batch.drain().await?;
        self.db.close().await;
        Ok(())
    }
}

fn spawn_maintenance(
    config: &EngineConfig,
    store: ContentStore,
    remote: DocumentStoreHandle,
    metrics: Arc<CostTracker>,
) -> Vec<JoinHandle<()>> {
    let sweep_store = store.clone();
    let max_age = config.entry_max_age();
    let sweep_interval = config.entry_sweep_interval();
    let expired_sweep = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let max_age = time::Duration::try_from(max_age).unwrap_or(time::Duration::days(1));
            if let Err(error) = sweep_store.sweep_expired(max_age).await {
                tracing::warn!(%error, "expired-entry sweep failed");
            }
        }
    });

    let dirty_interval = config.dirty_sweep_interval();
    let remote_timeout = config.remote_timeout();
    let dirty_sweep = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(dirty_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let dirty = match store.list_dirty().await {
                Ok(dirty) => dirty,
                Err(error) => {
                    tracing::warn!(%error, "dirty-entry listing failed");
                    continue;
                },
            };
            for path in dirty {
                if let Err(error) = reconcile_entry(&store, &remote, &metrics, &path, remote_timeout).await {
                    tracing::debug!(path, %error, "background reconciliation failed, will retry next sweep");
                    // An unreachable remote fails every path the same way
                    break;
                }
            }
        }
    });

    vec![expired_sweep, dirty_sweep]
}
