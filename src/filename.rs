//! Filename sanitization and byte-bounded truncation for download outputs.
//!
//! Output names come from untrusted message payloads, so they are scrubbed of
//! filesystem-unsafe characters and clamped to a byte budget. The clamp works
//! on the UTF-8 encoding: some platforms bound names by characters, others by
//! bytes, and the byte rule is the strictest, so it is applied everywhere.

use url::Url;

/// Maximum encoded length of an output filename in bytes.
pub const MAX_OUTPUT_NAME_BYTES: usize = 100;

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with `_`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    sanitized
}

/// Truncates a filename to at most `max_bytes` UTF-8 bytes, preserving the
/// extension and never splitting a multi-byte character.
///
/// The name is split into (stem, extension) at the last `.`; the stem's byte
/// budget is `max_bytes` minus the extension's encoded length, and the stem is
/// cut back to the nearest character boundary within that budget. The
/// extension is re-appended unchanged.
///
/// Degenerate case: when the extension alone exceeds `max_bytes`, the
/// extension is returned with an empty stem - a valid (if odd) name rather
/// than a failure. This is the only case where the result can exceed
/// `max_bytes`.
#[must_use]
pub fn truncate_filename(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    // A leading dot is part of the stem, not an extension separator.
    let (stem, ext) = match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    };

    let budget = max_bytes.saturating_sub(ext.len());
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}{}", &stem[..cut], ext)
}

/// Extracts the file extension (with leading dot, lowercased) from a URL's
/// last path segment. Extensions longer than 12 bytes or empty are rejected.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index..];
    if ext.len() <= 1 || ext.len() > 12 {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Extracts the extension (with leading dot) from a plain filename.
#[must_use]
pub fn extension_of(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => Some(&name[pos..]),
        _ => None,
    }
}
