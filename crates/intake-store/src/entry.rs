//! Cache entry model and its database row mapping.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::FromRow;
use time::OffsetDateTime;

/// A locally cached copy of a remote document.
///
/// An entry is either **fresh** (`is_dirty == false`, safe to serve without a
/// remote check) or **dirty** (must attempt reconciliation before being
/// trusted). Only two things may mutate an entry: a successful local write
/// acknowledged by the remote, or the sync listener observing a newer remote
/// version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Caller-facing document identifier (doubles as the remote path).
    pub id: String,
    /// Raw document bytes.
    pub payload: Vec<u8>,
    /// Monotonic version observed from the remote.
    pub version: i64,
    /// Timestamp of the last remote write this entry reflects.
    pub last_remote_update: OffsetDateTime,
    /// Whether the payload may be stale relative to the remote source.
    pub is_dirty: bool,
    /// Payload size, denormalized so sweeps don't need to load payloads.
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Create a fresh entry reflecting a confirmed remote state.
    pub fn fresh(
        id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        version: i64,
        last_remote_update: OffsetDateTime,
    ) -> Self {
        let payload = payload.into();
        let size_bytes = payload.len() as u64;
        Self {
            id: id.into(),
            payload,
            version,
            last_remote_update,
            is_dirty: false,
            size_bytes,
        }
    }
}

/// Timestamps are persisted as milliseconds since the unix epoch.
///
/// Millisecond precision matches what remote change notifications carry, so
/// the listener's strictly-greater tie-break survives a round trip through
/// the database without truncation surprises.
pub(crate) fn timestamp_to_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn timestamp_from_millis(millis: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .or_raise(|| ErrorKind::InvalidData("timestamp"))
}

#[derive(Debug, FromRow)]
pub(crate) struct EntryRow {
    pub id: String,
    pub payload: Vec<u8>,
    pub version: i64,
    pub last_remote_update: i64,
    pub is_dirty: bool,
    pub size_bytes: i64,
}

impl TryFrom<EntryRow> for CacheEntry {
    type Error = crate::error::Error;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            payload: row.payload,
            version: row.version,
            last_remote_update: timestamp_from_millis(row.last_remote_update)?,
            is_dirty: row.is_dirty,
            size_bytes: u64::try_from(row.size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_not_dirty() {
        let entry = CacheEntry::fresh("doc-1", b"payload".to_vec(), 1, OffsetDateTime::UNIX_EPOCH);
        assert!(!entry.is_dirty);
        assert_eq!(entry.size_bytes, 7);
    }

    #[test]
    fn timestamp_roundtrip_keeps_millis() {
        let ts = OffsetDateTime::from_unix_timestamp_nanos(1_716_300_000_123_000_000).unwrap();
        let millis = timestamp_to_millis(ts);
        assert_eq!(timestamp_from_millis(millis).unwrap(), ts);
    }
}
