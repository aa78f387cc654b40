//! Filename normalization, fingerprinting, and title/artist parsing
//!
//! The duplicate-detection fingerprint is the normalized original filename
//! (lowercased, whitespace collapsed). It is deliberately not a content
//! hash: two uploads of the same song under the same name collide even when
//! the bytes differ, matching the established behavior clients rely on.

/// Duplicate-detection key for an original filename
pub fn fingerprint(original_filename: &str) -> String {
    collapse_whitespace(&original_filename.to_lowercase())
}

/// Filesystem-safe rendition of a client-supplied filename
///
/// Anything outside `[A-Za-z0-9._-]` becomes an underscore; runs of
/// underscores collapse, and leading dots are stripped so the result can
/// never be a hidden file or a path traversal.
pub fn sanitize_filename(original: &str) -> String {
    let mut out = String::with_capacity(original.len());
    let mut last_was_underscore = false;
    for c in original.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_start_matches(['.', '_']).trim_end_matches('_');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse `"<artist> - <title>"` out of a filename stem
///
/// Bracketed content (`()`, `[]`, `{}`) is stripped from both parts and
/// whitespace collapsed. A stem without the separator yields the whole name
/// as title and `"Unknown Artist"`.
pub fn parse_title_artist(stem: &str) -> (String, String) {
    let cleaned = collapse_whitespace(&strip_brackets(stem));

    if let Some((artist, title)) = cleaned.split_once(" - ") {
        let artist = collapse_whitespace(artist);
        let title = collapse_whitespace(title);
        if !artist.is_empty() && !title.is_empty() {
            return (title, artist);
        }
    }

    let title = if cleaned.is_empty() {
        collapse_whitespace(stem)
    } else {
        cleaned
    };
    let title = if title.is_empty() {
        "Unknown".to_string()
    } else {
        title
    };
    (title, "Unknown Artist".to_string())
}

/// Remove `( )`, `[ ]`, `{ }` groups including their content
///
/// Handles nesting; unbalanced closers are passed through verbatim.
pub fn strip_brackets(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut stack: Vec<char> = Vec::new();
    for c in input.chars() {
        match c {
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            _ if !stack.is_empty() => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Collapse runs of whitespace to single spaces and trim the ends
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a filename into (stem, lowercased extension without the dot)
pub fn split_extension(filename: &str) -> (&str, Option<String>) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem, Some(ext.to_lowercase()))
        }
        _ => (filename, None),
    }
}
