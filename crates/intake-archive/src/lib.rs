//! Deterministic document archive packing and unpacking.
//!
//! This crate builds single- or multi-file archives for submitted documents
//! before they reach remote storage, providing:
//!
//! - **Standardized names** derived from display titles plus a build-date
//!   suffix ([`pack`]), so entry names are stable and re-derivable no matter
//!   what the submitter called the upload
//! - **A manifest** mapping original filenames to standardized names,
//!   embedded in the archive itself
//! - **Extension-based content types** on unpack ([`unpack`]) from a fixed
//!   MIME table, never trusting caller-declared types
//!
//! The container format is gzip-compressed tar at the highest compression
//! level, prioritizing storage space over speed.

pub mod error;
mod manifest;
mod mime;
mod name;
mod pack;

pub use crate::manifest::{ArchiveManifest, ManifestEntry};
pub use crate::mime::{content_type_for_extension, content_type_for_name};
pub use crate::name::{standardized_name, title_token};
pub use crate::pack::{ArchiveInput, UnpackedArchive, UnpackedFile, pack, unpack};
