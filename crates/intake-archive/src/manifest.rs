//! Archive manifest model.

use serde::{Deserialize, Serialize};

/// Name of the manifest entry embedded as the first member of every archive.
pub(crate) const MANIFEST_ENTRY_NAME: &str = ".manifest.json";

/// Mapping of original filenames to standardized archive entry names.
///
/// Produced once at pack time and immutable thereafter. Unpacking uses it to
/// reverse-map standardized names back to the caller-facing originals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Content address of the archived payload (blake3 over entry names and
    /// bytes in pack order).
    pub archive_id: String,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub original_name: String,
    pub standardized_name: String,
    pub size_bytes: u64,
}

impl ArchiveManifest {
    /// Reverse-map a standardized entry name to the original filename.
    pub fn original_name_for(&self, standardized: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.standardized_name == standardized)
            .map(|entry| entry.original_name.as_str())
    }
}
