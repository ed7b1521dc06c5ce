//! Helpers for sanitizing untrusted names and for keeping log and span
//! attributes free of full filesystem paths.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a client-supplied file name to a safe single path component.
///
/// Directory parts (either separator) are dropped and control characters are
/// replaced with `_`. Returns `None` when nothing usable remains.
pub fn sanitize_file_name(original: &str) -> Option<String> {
    let last = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();

    let cleaned: String = last
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned)
}

/// Shortens `text` to at most `max` bytes on a char boundary, marking the cut.
pub fn truncate_for_log(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [{} bytes truncated]", &text[..end], text.len() - end)
}
