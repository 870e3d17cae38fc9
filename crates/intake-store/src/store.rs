//! The two-layer content store.
//!
//! L1 is an in-memory map that only ever holds a subset of what the L2
//! SQLite layer holds, and the two are invalidated together. Every component
//! of the engine goes through this narrow contract; nothing else touches the
//! backing database.

use crate::Database;
use crate::entry::{CacheEntry, EntryRow, timestamp_from_millis, timestamp_to_millis};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::instrument;

/// Persistent key→payload+metadata store for cached remote documents.
///
/// Cloning is cheap; clones share the same L1 map and connection pool.
#[derive(Debug, Clone)]
pub struct ContentStore {
    db: Database,
    l1: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl ContentStore {
    pub fn new(db: Database) -> Self {
        Self { db, l1: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Insert or overwrite an entry.
    ///
    /// Always succeeds unless the backing store is unavailable. The L1 view
    /// is updated only after the L2 write lands, keeping L1 ⊆ L2.
    #[instrument(skip(self, entry), fields(id = %entry.id, size = entry.size_bytes, dirty = entry.is_dirty))]
    pub async fn put(&self, entry: CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entries (id, payload, version, last_remote_update, is_dirty, size_bytes)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                payload = excluded.payload,
                version = excluded.version,
                last_remote_update = excluded.last_remote_update,
                is_dirty = excluded.is_dirty,
                size_bytes = excluded.size_bytes
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.payload)
        .bind(entry.version)
        .bind(timestamp_to_millis(entry.last_remote_update))
        .bind(entry.is_dirty)
        .bind(i64::try_from(entry.size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?)
        .execute(self.db.pool())
        .await
        .or_raise(|| ErrorKind::StorageUnavailable)?;
        self.l1.write().await.insert(entry.id.clone(), entry);
        Ok(())
    }

    /// Fetch an entry, consulting L1 before falling back to L2.
    ///
    /// A miss in both layers is `Ok(None)`; absence is not an error for
    /// callers that handle it.
    pub async fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.l1.read().await.get(id) {
            return Ok(Some(entry.clone()));
        }
        let row: Option<EntryRow> = sqlx::query_as("SELECT * FROM entries WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        let Some(row) = row else { return Ok(None) };
        let entry = CacheEntry::try_from(row)?;
        self.l1.write().await.insert(entry.id.clone(), entry.clone());
        Ok(Some(entry))
    }

    /// Remove an entry. Idempotent; deleting a missing id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        self.l1.write().await.remove(id);
        Ok(())
    }

    /// Flag an entry as possibly stale relative to the remote source.
    ///
    /// Returns `false` if no entry with that id exists.
    pub async fn mark_dirty(&self, id: &str) -> Result<bool> {
        self.set_dirty(id, true).await
    }

    /// Clear the dirty flag after a successful reconciliation.
    pub async fn clear_dirty(&self, id: &str) -> Result<bool> {
        self.set_dirty(id, false).await
    }

    async fn set_dirty(&self, id: &str, dirty: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE entries SET is_dirty = ? WHERE id = ?")
            .bind(dirty)
            .bind(id)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        if let Some(entry) = self.l1.write().await.get_mut(id) {
            entry.is_dirty = dirty;
        }
        Ok(result.rows_affected() > 0)
    }

    /// List the ids of all dirty entries, oldest remote update first.
    ///
    /// The proactive reconciliation sweep feeds off this.
    pub async fn list_dirty(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM entries WHERE is_dirty = 1 ORDER BY last_remote_update ASC")
            .fetch_all(self.db.pool())
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)
    }

    /// Remove entries whose last remote update is older than `max_age`.
    ///
    /// Runs as a periodic background task, never inline with a read or write.
    /// Swept ids are evicted from L1 in the same pass so the layers stay
    /// consistent. Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, max_age: Duration) -> Result<u64> {
        let cutoff = timestamp_to_millis(OffsetDateTime::now_utc() - max_age);
        let swept: Vec<String> = sqlx::query_scalar("DELETE FROM entries WHERE last_remote_update < ? RETURNING id")
            .bind(cutoff)
            .fetch_all(self.db.pool())
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        let count = swept.len() as u64;
        if !swept.is_empty() {
            let mut l1 = self.l1.write().await;
            for id in &swept {
                l1.remove(id);
            }
            tracing::debug!(count, "swept expired cache entries");
        }
        Ok(count)
    }

    /// Age of the oldest entry, if any. Exposed for sweep scheduling tests.
    pub async fn oldest_update(&self) -> Result<Option<OffsetDateTime>> {
        let millis: Option<i64> = sqlx::query_scalar("SELECT MIN(last_remote_update) FROM entries")
            .fetch_one(self.db.pool())
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        millis.map(timestamp_from_millis).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> ContentStore {
        ContentStore::new(Database::connect_in_memory().await.unwrap())
    }

    fn entry(id: &str, payload: &[u8], version: i64) -> CacheEntry {
        CacheEntry::fresh(id, payload.to_vec(), version, OffsetDateTime::now_utc())
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = store().await;
        store.put(entry("doc-1", b"hello", 1)).await.unwrap();
        let fetched = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(fetched.payload, b"hello");
        assert_eq!(fetched.version, 1);
        assert!(!fetched.is_dirty);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = store().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = store().await;
        store.put(entry("doc-1", b"old", 1)).await.unwrap();
        store.put(entry("doc-1", b"new", 2)).await.unwrap();
        let fetched = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(fetched.payload, b"new");
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store().await;
        store.put(entry("doc-1", b"data", 1)).await.unwrap();
        store.delete("doc-1").await.unwrap();
        assert!(store.get("doc-1").await.unwrap().is_none());
        // Second delete is a no-op, not an error
        store.delete("doc-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_dirty_flag_roundtrip() {
        let store = store().await;
        store.put(entry("doc-1", b"data", 1)).await.unwrap();
        assert!(store.mark_dirty("doc-1").await.unwrap());
        assert!(store.get("doc-1").await.unwrap().unwrap().is_dirty);
        assert!(store.clear_dirty("doc-1").await.unwrap());
        assert!(!store.get("doc-1").await.unwrap().unwrap().is_dirty);
        // Unknown id reports false rather than erroring
        assert!(!store.mark_dirty("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_dirty() {
        let store = store().await;
        store.put(entry("a", b"1", 1)).await.unwrap();
        store.put(entry("b", b"2", 1)).await.unwrap();
        store.mark_dirty("b").await.unwrap();
        assert_eq!(store.list_dirty().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let store = store().await;
        let old = CacheEntry::fresh("old", b"x".to_vec(), 1, OffsetDateTime::now_utc() - Duration::hours(2));
        store.put(old).await.unwrap();
        store.put(entry("new", b"y", 1)).await.unwrap();
        let swept = store.sweep_expired(Duration::hours(1)).await.unwrap();
        assert_eq!(swept, 1);
        // Swept from both layers: L1 must not resurrect the entry
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_l1_serves_after_l2_populate() {
        let store = store().await;
        store.put(entry("doc-1", b"data", 1)).await.unwrap();
        // Two gets: second should be served from L1 (same result either way,
        // this is a consistency check, not a perf assertion)
        let first = store.get("doc-1").await.unwrap().unwrap();
        let second = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(first, second);
    }
}
