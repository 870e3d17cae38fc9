//! Fixed extension→MIME table.
//!
//! Unpacking never trusts a caller-declared content type; the type is always
//! derived from the file extension via this table. Unknown extensions fall
//! back to `application/octet-stream`.

use crate::name::extension_of;

/// Content type for a lowercased file extension.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Content type for a filename, derived from its extension.
pub fn content_type_for_name(name: &str) -> &'static str {
    match extension_of(name) {
        Some(ext) => content_type_for_extension(&ext),
        None => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("report_20240521.pdf", "application/pdf")]
    #[case("abstract_20240521.DOCX", "application/vnd.openxmlformats-officedocument.wordprocessingml.document")]
    #[case("notes.txt", "text/plain")]
    #[case("mystery.bin", "application/octet-stream")]
    #[case("no-extension", "application/octet-stream")]
    fn test_content_type_for_name(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(content_type_for_name(name), expected);
    }
}
