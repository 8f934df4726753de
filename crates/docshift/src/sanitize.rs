//! Helpers for sanitizing data before it enters tracing span attributes,
//! archive entry names or response headers.
//!
//! Uploaded file names are client-controlled. These functions make sure a
//! name can never escape the scratch directory, smuggle a path into a ZIP
//! entry, or break a `Content-Disposition` header.

use std::path::Path;

/// Name used when a client supplies nothing usable.
pub const FALLBACK_FILE_NAME: &str = "file";

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a client-supplied file name to a single safe path component.
///
/// - `../../etc/passwd` → `passwd`
/// - `C:\Users\me\photo.jpg` → `photo.jpg`
/// - control characters are dropped, empty or dots-only names fall back to `file`
pub fn clean_file_name(original: &str) -> String {
    let last = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);

    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.trim_matches('.').is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Splits a file name into `(stem, extension)`; the extension excludes the dot.
///
/// A leading dot (`.bashrc`) is part of the stem, not an extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(pos) => (&name[..pos], Some(&name[pos + 1..])),
    }
}

/// Lowercased extension of a file name, if any.
pub fn extension_of(name: &str) -> Option<String> {
    split_extension(name).1.map(|e| e.to_ascii_lowercase())
}

/// Replaces every non-ASCII or quote-breaking character with `_`.
///
/// Used for the plain `filename=` parameter of `Content-Disposition`; the
/// full name travels in the RFC 5987 `filename*=` parameter.
pub fn ascii_fallback(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect()
}

/// Escapes every non-ASCII character of a JSON document as `\uXXXX` so it
/// can travel in an HTTP header value.
pub fn ascii_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
