//! Shared wire-level types for the remote contracts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A document as read from the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    pub payload: Vec<u8>,
    pub version: i64,
    /// Timestamp of the last remote write, as reported by the remote.
    pub remote_timestamp: OffsetDateTime,
}

/// A change notification delivered on a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub path: String,
    pub payload: Vec<u8>,
    pub version: i64,
    pub remote_timestamp: OffsetDateTime,
}

/// Acknowledgement of an accepted write or batch commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub version: i64,
    pub remote_timestamp: OffsetDateTime,
}

/// A single write intent, owned by the batch coordinator's queue until it is
/// committed or permanently failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Replace the document at `target` wholesale.
    Set { target: String, payload: Vec<u8> },
    /// Merge a JSON patch into the document at `target`.
    Update { target: String, patch: Value },
    /// Remove the document at `target`.
    Delete { target: String },
}

impl BatchOperation {
    /// Remote path this operation applies to.
    pub fn target(&self) -> &str {
        match self {
            Self::Set { target, .. } | Self::Update { target, .. } | Self::Delete { target } => target,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// Shape of a list/query request.
///
/// Serialized canonically to derive the query cache key, so field order here
/// is deliberate and stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryShape {
    pub collection: String,
    /// Equality filters over dotted field paths.
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    /// Dotted field path to sort ascending by.
    #[serde(default)]
    pub order_by: Option<String>,
    /// Dotted field paths to project; empty means the whole document.
    #[serde(default)]
    pub field_mask: Vec<String>,
    pub page_size: u32,
    /// Opaque continuation cursor. Results for cursor pages are never cached
    /// because a cursor cannot be safely replayed offline.
    #[serde(default)]
    pub page_cursor: Option<String>,
}

impl QueryShape {
    pub fn for_collection(collection: impl Into<String>, page_size: u32) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            field_mask: Vec::new(),
            page_size,
            page_cursor: None,
        }
    }

    /// Whether this shape asks for the first page.
    pub fn is_first_page(&self) -> bool {
        self.page_cursor.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub equals: Value,
}

/// A record returned by a query: a JSON document plus its remote path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub path: String,
    pub fields: Value,
}
