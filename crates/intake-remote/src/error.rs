//! Remote Store Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A remote store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally. Transport errors are recovered locally by the cache engine
/// (mark dirty, requeue); they never reach the UI layer as failures.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote call failed or timed out. Retrying may succeed.
    #[display("transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// The remote rejected the request outright. Retrying will not help.
    #[display("request rejected: {_0}")]
    Rejected(#[error(not(source))] String),
    /// A blob URL did not resolve to anything.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
