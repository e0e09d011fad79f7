//! Flat scalar field extraction from JSON-like text.
//!
//! This is NOT a JSON parser and must not grow into one: no nesting, no
//! escape decoding, no typing. It handles exactly the flat, string-valued,
//! server-controlled shape of the update check response. It lives behind
//! this one function so callers never depend on the scanning strategy and it
//! can be replaced with a real parser without touching them.

/// Find `"key":` in `text` and return the scalar value that follows.
///
/// A quoted value runs to the next unescaped `"`; a bare value runs to the
/// next `,` or `}`. Returns `None` when the key is absent or a quoted value
/// is unterminated.
pub fn extract(text: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\":");
    let at = text.find(&needle)?;
    let rest = text[at + needle.len()..].trim_start_matches([' ', '\t']);

    if let Some(quoted) = rest.strip_prefix('"') {
        let bytes = quoted.as_bytes();
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b'\\' if !escaped => escaped = true,
                b'"' if !escaped => return Some(quoted[..i].to_string()),
                _ => escaped = false,
            }
        }
        None
    } else {
        let end = rest.find([',', '}']).unwrap_or(rest.len());
        Some(rest[..end].trim_end().to_string())
    }
}
