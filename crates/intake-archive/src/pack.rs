//! Archive packing and unpacking.
//!
//! The container format is a gzip-compressed tar stream: ubiquitous, easy to
//! inspect with standard tooling, and byte-exact on round trip within this
//! system. The manifest rides along as the first entry so an archive is
//! self-describing.
//!
//! Compression uses the highest gzip level; archives are written once and
//! read rarely, so storage space wins over speed.

use crate::error::{ErrorKind, Result};
use crate::manifest::{ArchiveManifest, MANIFEST_ENTRY_NAME, ManifestEntry};
use crate::mime::content_type_for_name;
use crate::name::standardized_name;
use exn::{OptionExt, ResultExt};
use flate2::Compression as GzCompression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::HashSet;
use std::io::Read;
use time::Date;
use tracing::instrument;

const GZIP_LEVEL: GzCompression = GzCompression::best();

/// One file to be packed, with the display title its entry name derives from.
#[derive(Debug, Clone)]
pub struct ArchiveInput {
    /// Human display title (e.g. `"Form 07A: Protocol Review Application Form"`).
    pub title: String,
    /// Filename as uploaded by the submitter; only its extension survives.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveInput {
    pub fn new(title: impl Into<String>, file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { title: title.into(), file_name: file_name.into(), bytes: bytes.into() }
    }
}

/// A file yielded by [`unpack`].
///
/// The content type is always derived from the entry's extension via the
/// fixed MIME table, never from anything the packer claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Result of unpacking an archive.
#[derive(Debug, Clone)]
pub struct UnpackedArchive {
    pub files: Vec<UnpackedFile>,
    /// Present when the archive was produced by [`pack`]. Foreign tar.gz
    /// streams without an embedded manifest still unpack.
    pub manifest: Option<ArchiveManifest>,
}

/// Pack files into a single archive with deterministic standardized names.
///
/// `built_on` is the date the archive is assembled; it becomes the
/// `_<YYYYMMDD>` suffix of every entry name. Two inputs standardizing to the
/// same name fail with [`ErrorKind::DuplicateArchiveEntry`] rather than
/// overwriting. An empty input set is legal and produces an empty archive.
#[instrument(skip(inputs), fields(count = inputs.len()))]
pub fn pack(inputs: &[ArchiveInput], built_on: Date) -> Result<(Vec<u8>, ArchiveManifest)> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(inputs.len());
    let mut hasher = blake3::Hasher::new();
    for input in inputs {
        let standardized = standardized_name(&input.title, built_on, &input.file_name);
        if !seen.insert(standardized.clone()) {
            exn::bail!(ErrorKind::DuplicateArchiveEntry(standardized));
        }
        hasher.update(standardized.as_bytes());
        hasher.update(&input.bytes);
        entries.push(ManifestEntry {
            original_name: input.file_name.clone(),
            standardized_name: standardized,
            size_bytes: input.bytes.len() as u64,
        });
    }
    let manifest = ArchiveManifest { archive_id: hasher.finalize().to_hex().to_string(), entries };

    let encoder = GzEncoder::new(Vec::new(), GZIP_LEVEL);
    let mut builder = tar::Builder::new(encoder);
    let manifest_json = serde_json::to_vec(&manifest).or_raise(|| ErrorKind::InvalidManifest)?;
    append_entry(&mut builder, MANIFEST_ENTRY_NAME, &manifest_json)?;
    for (input, entry) in inputs.iter().zip(&manifest.entries) {
        append_entry(&mut builder, &entry.standardized_name, &input.bytes)?;
    }
    let encoder = builder.into_inner().or_raise(|| ErrorKind::Io)?;
    let bytes = encoder.finish().or_raise(|| ErrorKind::Io)?;
    Ok((bytes, manifest))
}

fn append_entry(builder: &mut tar::Builder<GzEncoder<Vec<u8>>>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes).or_raise(|| ErrorKind::Io)
}

/// Unpack an archive produced by [`pack`].
///
/// Yields every entry with its standardized name, raw bytes, and a content
/// type inferred from the extension. Fails with
/// [`ErrorKind::CorruptArchive`] if the byte stream is not a gzipped tar.
#[instrument(skip(bytes), fields(size = bytes.len()))]
pub fn unpack(bytes: &[u8]) -> Result<UnpackedArchive> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut files = Vec::new();
    let mut manifest = None;
    // Decompression errors surface lazily while iterating entries, so a
    // truncated or non-gzip stream is caught here rather than up front.
    for entry in archive.entries().or_raise(|| ErrorKind::CorruptArchive)? {
        let mut entry = entry.or_raise(|| ErrorKind::CorruptArchive)?;
        let name = entry
            .path()
            .ok()
            .and_then(|p| p.to_str().map(str::to_owned))
            .ok_or_raise(|| ErrorKind::CorruptArchive)?;
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content).or_raise(|| ErrorKind::CorruptArchive)?;
        if name == MANIFEST_ENTRY_NAME {
            manifest = Some(serde_json::from_slice(&content).or_raise(|| ErrorKind::InvalidManifest)?);
            continue;
        }
        let content_type = content_type_for_name(&name);
        files.push(UnpackedFile { name, bytes: content, content_type });
    }
    Ok(UnpackedArchive { files, manifest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn inputs() -> Vec<ArchiveInput> {
        vec![
            ArchiveInput::new(
                "Form 07A: Protocol Review Application Form",
                "protocol draft (3).pdf",
                b"%PDF-1.7 fake".to_vec(),
            ),
            ArchiveInput::new("Abstract", "abstract.docx", b"PK fake docx".to_vec()),
        ]
    }

    #[test]
    fn test_pack_standardizes_names() {
        let (_, manifest) = pack(&inputs(), date!(2024 - 05 - 21)).unwrap();
        let names: Vec<_> = manifest.entries.iter().map(|e| e.standardized_name.as_str()).collect();
        assert_eq!(names, vec!["protocolReviewApplicationForm_20240521.pdf", "abstract_20240521.docx"]);
    }

    #[test]
    fn test_roundtrip_preserves_bytes_and_count() {
        let inputs = inputs();
        let (bytes, manifest) = pack(&inputs, date!(2024 - 05 - 21)).unwrap();
        let unpacked = unpack(&bytes).unwrap();
        assert_eq!(unpacked.files.len(), inputs.len());
        for (file, input) in unpacked.files.iter().zip(&inputs) {
            assert_eq!(file.bytes, input.bytes);
        }
        assert_eq!(unpacked.manifest, Some(manifest));
    }

    #[test]
    fn test_content_type_derived_from_extension() {
        let (bytes, _) = pack(&inputs(), date!(2024 - 05 - 21)).unwrap();
        let unpacked = unpack(&bytes).unwrap();
        assert_eq!(unpacked.files[0].content_type, "application/pdf");
        assert_eq!(
            unpacked.files[1].content_type,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }

    #[test]
    fn test_duplicate_standardized_name_is_an_error() {
        let dupes = vec![
            ArchiveInput::new("Abstract", "first.pdf", b"one".to_vec()),
            ArchiveInput::new("Abstract", "second.pdf", b"two".to_vec()),
        ];
        let err = pack(&dupes, date!(2024 - 05 - 21)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateArchiveEntry(name) if name == "abstract_20240521.pdf"));
    }

    #[test]
    fn test_same_title_different_extension_is_fine() {
        let ok = vec![
            ArchiveInput::new("Abstract", "first.pdf", b"one".to_vec()),
            ArchiveInput::new("Abstract", "second.docx", b"two".to_vec()),
        ];
        assert!(pack(&ok, date!(2024 - 05 - 21)).is_ok());
    }

    #[test]
    fn test_empty_archive_is_legal() {
        let (bytes, manifest) = pack(&[], date!(2024 - 05 - 21)).unwrap();
        assert!(manifest.entries.is_empty());
        let unpacked = unpack(&bytes).unwrap();
        assert!(unpacked.files.is_empty());
    }

    #[test]
    fn test_unpack_garbage_is_corrupt() {
        let err = unpack(b"this is definitely not a tar.gz").unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptArchive));
    }

    #[test]
    fn test_archive_id_is_content_addressed() {
        let (_, a) = pack(&inputs(), date!(2024 - 05 - 21)).unwrap();
        let (_, b) = pack(&inputs(), date!(2024 - 05 - 21)).unwrap();
        assert_eq!(a.archive_id, b.archive_id);
        let mut changed = inputs();
        changed[0].bytes.push(0);
        let (_, c) = pack(&changed, date!(2024 - 05 - 21)).unwrap();
        assert_ne!(a.archive_id, c.archive_id);
    }
}
