//! Character set detection for fetched HTML
//!
//! Pages linked from the content source are not always UTF-8; Japanese
//! sites in particular still serve Shift_JIS and EUC-JP. The charset is
//! taken from, in order: a byte order mark, the `Content-Type` header,
//! a `<meta>` declaration in the first 1024 bytes, and finally a guess.

use encoding_rs::{Encoding, EUC_JP, ISO_2022_JP, SHIFT_JIS, UTF_8};

/// Number of leading bytes searched for a `<meta>` charset declaration
const META_SCAN_LIMIT: usize = 1024;

/// Extract the `charset` parameter from a `Content-Type` header value
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    charset_param(&content_type.to_ascii_lowercase())
}

/// Find a charset declared by a `<meta>` tag near the start of the document
///
/// Handles both `<meta charset="...">` and the older
/// `<meta http-equiv="Content-Type" content="text/html; charset=...">`.
pub fn charset_from_html(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(META_SCAN_LIMIT)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    let mut rest = head.as_str();
    while let Some(start) = rest.find("<meta") {
        let tag = &rest[start..];
        let end = tag.find('>').unwrap_or(tag.len());
        if let Some(charset) = charset_param(&tag[..end]) {
            return Some(charset);
        }
        rest = &tag[end..];
    }
    None
}

/// Decode an HTML body to text, never failing
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return decode_with(encoding, &bytes[bom_len..]);
    }

    let declared = content_type
        .and_then(charset_from_content_type)
        .or_else(|| charset_from_html(bytes))
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    if let Some(encoding) = declared {
        return decode_with(encoding, bytes);
    }

    decode_with(guess_encoding(bytes), bytes)
}

/// Guess the encoding of undeclared content
///
/// Valid UTF-8 wins. ISO-2022-JP is 7-bit and therefore also valid UTF-8,
/// so its escape sequences are checked first. Among the 8-bit Japanese
/// encodings EUC-JP is tried before Shift_JIS because EUC-JP text usually
/// also decodes as (wrong) half-width katakana in Shift_JIS.
pub fn guess_encoding(bytes: &[u8]) -> &'static Encoding {
    if has_iso_2022_jp_escape(bytes) {
        return ISO_2022_JP;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    [EUC_JP, SHIFT_JIS]
        .into_iter()
        .find(|encoding| {
            encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .is_some()
        })
        .unwrap_or(UTF_8)
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        tracing::debug!("Replaced undecodable bytes while decoding as {}", encoding.name());
    }
    text.into_owned()
}

fn has_iso_2022_jp_escape(bytes: &[u8]) -> bool {
    bytes
        .windows(3)
        .any(|w| w == b"\x1b$B" || w == b"\x1b$@" || w == b"\x1b(J")
}

/// Value of `charset=...` within already lower-cased text
fn charset_param(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(pos) = rest.find("charset") {
        let after = rest[pos + "charset".len()..].trim_start();
        if let Some(value) = after.strip_prefix('=') {
            let value = value.trim_start().trim_start_matches(['"', '\'']);
            let charset: String = value
                .chars()
                .take_while(|c| !matches!(c, '"' | '\'' | ';' | ',' | '>' | '/') && !c.is_whitespace())
                .collect();
            if !charset.is_empty() {
                return Some(charset);
            }
        }
        rest = &rest[pos + "charset".len()..];
    }
    None
}
