//! Content Store Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A content store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for content store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The backing store could not be reached or the statement failed.
    #[display("local store unavailable")]
    StorageUnavailable,
    /// Schema migration failed on connect.
    #[display("store migration error")]
    Migration,
    /// A row contained data that could not be mapped back to an entry.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable)
    }
}
