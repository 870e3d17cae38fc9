//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Archive errors are structural: silently continuing past any of them would
/// silently lose or corrupt a submitted document, so they always propagate.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte stream could not be parsed as an archive.
    #[display("corrupt archive")]
    CorruptArchive,
    /// Two inputs standardized to the same entry name.
    #[display("duplicate archive entry: {_0}")]
    DuplicateArchiveEntry(#[error(not(source))] String),
    /// The embedded manifest could not be serialized or parsed.
    #[display("invalid archive manifest")]
    InvalidManifest,
    /// An I/O operation on an in-memory buffer failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
