//! Small helpers shared across crates.

use std::path::Path;

/// Maximum characters of diagnostic output included in notifications.
pub const DIAGNOSTIC_SAMPLE_CHARS: usize = 1000;

/// Turn a file stem into a lowercase, underscore-separated name.
///
/// Non-alphanumeric runs collapse into a single `_`; leading and trailing
/// separators are dropped. An empty result becomes `"video"`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_sep = false;

    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if slug.is_empty() {
        "video".to_string()
    } else {
        slug
    }
}

/// Guess a MIME type from the file extension, defaulting to JPEG.
pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "image/jpeg",
    }
}

/// First [`DIAGNOSTIC_SAMPLE_CHARS`] characters of `text`, with `...`
/// appended when truncated.
pub fn diagnostic_sample(text: &str) -> String {
    match text.char_indices().nth(DIAGNOSTIC_SAMPLE_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
