//! Standardized entry name derivation.
//!
//! Archive entries are named from the human display title rather than the
//! uploaded filename, so names are stable, collision-resistant, and
//! re-derivable regardless of what the submitter called the file.

use regex::Regex;
use std::sync::LazyLock;
use time::Date;
use time::macros::format_description;

/// Form titles arrive as e.g. `"Form 07A: Protocol Review Application Form"`;
/// the numbering prefix is presentation noise and is stripped before naming.
static FORM_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^form\s*\d+[a-z]?\s*:\s*").expect("static pattern"));

/// Derive the camel-style base token from a display title.
///
/// Whitespace is collapsed, non-alphanumeric characters are dropped, and
/// words are joined lowerCamelCase.
pub fn title_token(title: &str) -> String {
    let stripped = FORM_PREFIX.replace(title, "");
    let mut token = String::with_capacity(stripped.len());
    for word in stripped.split_whitespace() {
        let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if word.is_empty() {
            continue;
        }
        if token.is_empty() {
            token.extend(word.chars().flat_map(char::to_lowercase));
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                token.extend(first.to_uppercase());
                token.extend(chars.flat_map(char::to_lowercase));
            }
        }
    }
    token
}

/// Full standardized entry name: `<token>_<YYYYMMDD><.ext>`.
///
/// The date is the day the archive is built; the extension comes from the
/// original filename (lowercased) and is omitted when the original had none.
pub fn standardized_name(title: &str, date: Date, original_name: &str) -> String {
    let stamp = date
        .format(format_description!("[year][month][day]"))
        // Formatting a valid Date with a static description cannot fail.
        .unwrap_or_default();
    let mut name = format!("{}_{stamp}", title_token(title));
    if let Some(ext) = extension_of(original_name) {
        name.push('.');
        name.push_str(&ext);
    }
    name
}

/// Lowercased extension of a filename, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::date;

    #[rstest]
    #[case("Form 07A: Protocol Review Application Form", "protocolReviewApplicationForm")]
    #[case("Abstract", "abstract")]
    #[case("form 12: Consent   Document", "consentDocument")]
    #[case("Budget & Justification", "budgetJustification")]
    #[case("FORM 3B:Signed Cover Page", "signedCoverPage")]
    fn test_title_token(#[case] title: &str, #[case] expected: &str) {
        assert_eq!(title_token(title), expected);
    }

    #[test]
    fn test_standardized_name_matches_expected_shape() {
        let name = standardized_name(
            "Form 07A: Protocol Review Application Form",
            date!(2024 - 05 - 21),
            "my upload.PDF",
        );
        assert_eq!(name, "protocolReviewApplicationForm_20240521.pdf");
        let name = standardized_name("Abstract", date!(2024 - 05 - 21), "abstract-final-v2.docx");
        assert_eq!(name, "abstract_20240521.docx");
    }

    #[test]
    fn test_standardized_name_is_deterministic() {
        let a = standardized_name("Abstract", date!(2024 - 05 - 21), "one.txt");
        let b = standardized_name("Abstract", date!(2024 - 05 - 21), "two.txt");
        assert_eq!(a, b);
    }

    #[rstest]
    #[case("file.pdf", Some("pdf"))]
    #[case("file.tar.GZ", Some("gz"))]
    #[case("noext", None)]
    #[case(".hidden", None)]
    #[case("trailingdot.", None)]
    fn test_extension_of(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(extension_of(name).as_deref(), expected);
    }
}
