//! Configuration Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A provider (file, env) could not be read or parsed.
    #[display("failed to load configuration")]
    Load,
    /// A loaded value fails validation.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] &'static str),
    /// No usable data directory could be determined for the store database.
    #[display("no data directory available")]
    NoDataDir,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
