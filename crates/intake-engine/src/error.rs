//! Engine Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! The engine absorbs everything recoverable (stale reads, transient
//! transport errors, batch retries) internally; what's left here is what a
//! caller can actually observe.

use derive_more::{Display, Error};

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The document does not exist locally or remotely. Expected; callers
    /// that handle absence treat this as data, not failure.
    #[display("document not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The local content store failed underneath us.
    #[display("content store error")]
    Store,
    /// The remote could not be reached and no stale data was available to
    /// degrade to.
    #[display("remote unavailable")]
    RemoteUnavailable,
    /// A batch commit was rejected or timed out. The operations are back in
    /// the queue; a later flush will retry them.
    #[display("batch commit failed")]
    CommitFailed,
    /// Structural archive error (corrupt stream, duplicate entry). Always
    /// surfaced; silently continuing would lose a submitted document.
    #[display("archive error")]
    Archive,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable | Self::CommitFailed)
    }
}
