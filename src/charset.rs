//! Character encoding detection and handling for WCM exports
//!
//! Stellent exports are usually UTF-8, but older instances wrote Latin-1 or
//! Windows-1252 and say so in the XML declaration. The export is decoded to
//! a `String` before it reaches the XML reader.
//!
//! # Detection Cascade
//!
//! 1. **Byte Order Mark**: a UTF-8 or UTF-16 BOM decides the encoding
//! 2. **XML Declaration**: `<?xml version="1.0" encoding="…"?>`
//! 3. **Default to UTF-8**: if both fail
//!
//! # Examples
//!
//! ```rust
//! use learning_importer::charset::{decode_export, detect_export_charset};
//!
//! let xml = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><root/>";
//! assert_eq!(detect_export_charset(xml), "ISO-8859-1");
//!
//! let latin1 = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><root>caf\xe9</root>";
//! assert!(decode_export(latin1).unwrap().ends_with("café</root>"));
//!
//! // Undeclared Latin-1 is not valid UTF-8
//! assert!(decode_export(b"<root>caf\xe9</root>").is_err());
//! ```

use std::sync::OnceLock;

use encoding_rs::Encoding;
use regex::Regex;

use crate::error::ConversionError;

/// Default charset when detection fails
const DEFAULT_CHARSET: &str = "UTF-8";

/// Maximum bytes to scan for the XML declaration
const DECLARATION_SCAN_LIMIT: usize = 1024;

/// Detect the character encoding of an export
///
/// Always returns a charset name, defaulting to `UTF-8`. Names are
/// normalised to uppercase.
pub fn detect_export_charset(xml: &[u8]) -> String {
    // Level 1: Byte order mark
    if let Some((encoding, _)) = Encoding::for_bom(xml) {
        return normalize_charset(encoding.name());
    }

    // Level 2: XML declaration
    if let Some(charset) = extract_encoding_from_declaration(xml) {
        return normalize_charset(&charset);
    }

    // Level 3: Default to UTF-8
    DEFAULT_CHARSET.to_string()
}

/// Extract the `encoding` pseudo-attribute of the XML declaration
///
/// Only the first 1024 bytes are scanned; the declaration must be at the
/// start of the document.
///
/// ```rust
/// use learning_importer::charset::extract_encoding_from_declaration;
///
/// assert_eq!(
///     extract_encoding_from_declaration(b"<?xml version='1.0' encoding='windows-1252'?>"),
///     Some("windows-1252".to_string())
/// );
/// assert_eq!(extract_encoding_from_declaration(b"<?xml version=\"1.0\"?>"), None);
/// ```
pub fn extract_encoding_from_declaration(xml: &[u8]) -> Option<String> {
    let scan_limit = std::cmp::min(xml.len(), DECLARATION_SCAN_LIMIT);
    let prefix = String::from_utf8_lossy(&xml[..scan_limit]);

    static DECLARATION_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = DECLARATION_REGEX
        .get_or_init(|| {
            Regex::new(r#"^\s*<\?xml\s[^>]*?\bencoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).ok()
        })
        .as_ref()?;

    regex
        .captures(&prefix)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Normalize charset name to uppercase
///
/// ```rust
/// use learning_importer::charset::normalize_charset;
///
/// assert_eq!(normalize_charset("utf-8"), "UTF-8");
/// assert_eq!(normalize_charset("windows-1252"), "WINDOWS-1252");
/// ```
pub fn normalize_charset(charset: &str) -> String {
    charset.to_uppercase()
}

/// Decode a raw export to UTF-8 text
///
/// # Errors
///
/// - `ConversionError::EncodingError`: the declared charset is unknown, or
///   the bytes are not valid in the detected charset
pub fn decode_export(bytes: &[u8]) -> Result<String, ConversionError> {
    let (bytes, bom_charset) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (&bytes[bom_len..], Some(encoding.name())),
        None => (bytes, None),
    };
    let detected_charset = bom_charset
        .map(normalize_charset)
        .or_else(|| extract_encoding_from_declaration(bytes).map(|c| normalize_charset(&c)))
        .unwrap_or_else(|| DEFAULT_CHARSET.to_string());

    if detected_charset.eq_ignore_ascii_case("UTF-8") {
        return std::str::from_utf8(bytes).map(str::to_string).map_err(|e| {
            ConversionError::EncodingError(format!(
                "Invalid UTF-8 at byte position {}: {} (detected charset: {})",
                e.valid_up_to(),
                e,
                detected_charset
            ))
        });
    }

    let encoding = Encoding::for_label(detected_charset.as_bytes()).ok_or_else(|| {
        ConversionError::EncodingError(format!(
            "Unsupported charset '{}' in export",
            detected_charset
        ))
    })?;

    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| {
            ConversionError::EncodingError(format!(
                "Invalid byte sequence for charset '{}'",
                detected_charset
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_declaration_double_quotes() {
        assert_eq!(
            extract_encoding_from_declaration(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>"),
            Some("UTF-8".to_string())
        );
    }

    #[test]
    fn test_declaration_with_standalone() {
        assert_eq!(
            extract_encoding_from_declaration(
                b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\" standalone=\"yes\"?>"
            ),
            Some("ISO-8859-1".to_string())
        );
    }

    #[test]
    fn test_declaration_must_lead_document() {
        assert_eq!(
            extract_encoding_from_declaration(b"<root><?xml version=\"1.0\" encoding=\"ascii\"?>"),
            None
        );
    }

    #[test]
    fn test_encoding_outside_declaration_ignored() {
        assert_eq!(
            extract_encoding_from_declaration(b"<?xml version=\"1.0\"?><row encoding=\"latin1\"/>"),
            None
        );
    }

    #[test]
    fn test_declaration_beyond_scan_limit() {
        let mut xml = vec![b' '; DECLARATION_SCAN_LIMIT + 10];
        xml.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"latin1\"?>");
        assert_eq!(extract_encoding_from_declaration(&xml), None);
    }

    #[test]
    fn test_detect_bom_takes_priority() {
        let mut xml = vec![0xEF, 0xBB, 0xBF];
        xml.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>");
        assert_eq!(detect_export_charset(&xml), "UTF-8");
    }

    #[test]
    fn test_detect_default() {
        assert_eq!(detect_export_charset(b"<root/>"), "UTF-8");
        assert_eq!(detect_export_charset(b""), "UTF-8");
    }

    #[test]
    fn test_decode_utf8_strips_bom() {
        let mut xml = vec![0xEF, 0xBB, 0xBF];
        xml.extend_from_slice("<root>é</root>".as_bytes());
        assert_eq!(decode_export(&xml).expect("decode failed"), "<root>é</root>");
    }

    #[test]
    fn test_decode_latin1_declaration() {
        let xml = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><root>caf\xe9</root>";
        let decoded = decode_export(xml).expect("decode failed");
        assert!(decoded.ends_with("<root>café</root>"));
    }

    #[test]
    fn test_decode_utf16le_bom() {
        let mut xml = vec![0xFF, 0xFE];
        for unit in "<r>x</r>".encode_utf16() {
            xml.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_export(&xml).expect("decode failed"), "<r>x</r>");
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let result = decode_export(b"<root>\xff\xfe\xfd</root>");
        assert!(matches!(result, Err(ConversionError::EncodingError(_))));
    }

    #[test]
    fn test_decode_unknown_charset() {
        let result = decode_export(b"<?xml version=\"1.0\" encoding=\"klingon-8\"?><r/>");
        assert!(matches!(result, Err(ConversionError::EncodingError(_))));
    }

    #[test]
    fn test_normalize_charset() {
        assert_eq!(normalize_charset("Utf-8"), "UTF-8");
        assert_eq!(normalize_charset("iso-8859-1"), "ISO-8859-1");
    }

    proptest! {
        #[test]
        fn prop_declared_charset_is_detected(
            charset in prop::sample::select(vec!["utf-8", "iso-8859-1", "windows-1252", "shift_jis", "big5"]),
            single_quotes in any::<bool>(),
        ) {
            let xml = if single_quotes {
                format!("<?xml version='1.0' encoding='{}'?><root/>", charset)
            } else {
                format!("<?xml version=\"1.0\" encoding=\"{}\"?><root/>", charset)
            };
            prop_assert_eq!(detect_export_charset(xml.as_bytes()), charset.to_uppercase());
        }

        #[test]
        fn prop_utf8_text_round_trips_unchanged(text in "\\PC{0,100}") {
            let xml = format!("<root>{}</root>", text);
            prop_assert_eq!(decode_export(xml.as_bytes()).expect("decode failed"), xml);
        }
    }
}
