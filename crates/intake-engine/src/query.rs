//! Short-TTL cache of list/query results.
//!
//! Results are keyed by a stable hash of the query shape (collection,
//! filters, sort, field mask, page size). Only first pages are ever cached:
//! a continuation cursor cannot be safely replayed offline, so cursor pages
//! always go to the remote. Invalidation is explicit (writers call
//! [`QueryCache::invalidate`]) or by TTL expiry - never automatic.

use crate::error::{ErrorKind, Result};
use crate::mask::project;
use crate::metrics::CostTracker;
use intake_remote::{DocumentStoreHandle, QueryShape, Record};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

struct CachedQuery {
    results: Vec<Record>,
    cached_at: Instant,
}

pub struct QueryCache {
    remote: DocumentStoreHandle,
    metrics: Arc<CostTracker>,
    ttl: Duration,
    remote_timeout: Duration,
    entries: RwLock<HashMap<String, CachedQuery>>,
}

/// Cache key: readable collection prefix (so substring invalidation works)
/// plus a blake3 hash of everything that shapes the result set. The cursor
/// is deliberately excluded; cursor pages never touch the cache.
fn shape_key(shape: &QueryShape) -> String {
    let canonical = serde_json::json!({
        "collection": shape.collection,
        "filters": shape.filters,
        "order_by": shape.order_by,
        "field_mask": shape.field_mask,
        "page_size": shape.page_size,
    });
    let hash = blake3::hash(canonical.to_string().as_bytes());
    format!("{}:{}", shape.collection, hash.to_hex())
}

impl QueryCache {
    pub fn new(remote: DocumentStoreHandle, metrics: Arc<CostTracker>, ttl: Duration, remote_timeout: Duration) -> Self {
        Self { remote, metrics, ttl, remote_timeout, entries: RwLock::new(HashMap::new()) }
    }

    /// Run a query, serving from cache when a fresh first-page entry exists.
    ///
    /// Returns the records plus whether they came from cache. A remote
    /// failure degrades to the cached results (even expired ones) when any
    /// exist; only a failure with nothing to fall back on surfaces as
    /// [`ErrorKind::RemoteUnavailable`].
    #[instrument(skip(self, shape), fields(collection = %shape.collection, page_size = shape.page_size))]
    pub async fn get(&self, shape: &QueryShape) -> Result<(Vec<Record>, bool)> {
        let key = shape_key(shape);
        if shape.is_first_page() {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(&key) {
                if cached.cached_at.elapsed() < self.ttl {
                    self.metrics.record_cache_hit();
                    return Ok((cached.results.clone(), true));
                }
            }
        }

        let outcome = tokio::time::timeout(self.remote_timeout, self.remote.run_query(shape)).await;
        let records = match outcome {
            Ok(Ok(records)) => records,
            Ok(Err(_)) | Err(_) => {
                // Degrade to whatever we have rather than failing the
                // caller; availability wins over strict consistency here.
                let entries = self.entries.read().await;
                if let Some(cached) = entries.get(&key) {
                    tracing::warn!(key, "remote query failed, serving cached results");
                    self.metrics.record_cache_hit();
                    return Ok((cached.results.clone(), true));
                }
                exn::bail!(ErrorKind::RemoteUnavailable);
            },
        };
        self.metrics.record_cache_miss();
        // Reads are billed per matched document, minimum one per query.
        self.metrics.record_reads((records.len() as u64).max(1));

        let records: Vec<Record> = records
            .into_iter()
            .map(|record| {
                let fields = project(&record.fields, &shape.field_mask);
                Record { path: record.path, fields }
            })
            .collect();
        if shape.is_first_page() {
            self.entries.write().await.insert(key, CachedQuery { results: records.clone(), cached_at: Instant::now() });
        }
        Ok((records, false))
    }

    /// Remove all entries whose key contains `pattern`, or everything when
    /// no pattern is given. Writers call this after any mutation that could
    /// affect a cached result set.
    pub async fn invalidate(&self, pattern: Option<&str>) {
        let mut entries = self.entries.write().await;
        match pattern {
            Some(pattern) => entries.retain(|key, _| !key.contains(pattern)),
            None => entries.clear(),
        }
    }

    /// Number of cached result sets (for tests and metrics spot checks).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
