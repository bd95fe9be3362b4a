/// Truncate to at most `max_chars` characters, appending `...` when cut.
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_owned(),
    }
}

/// Split into pieces of at most `size` characters, never inside a code point.
#[must_use]
pub fn chunk_chars(s: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in s.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            chunks.push(&s[start..idx]);
            start = idx;
        }
    }
    if start < s.len() {
        chunks.push(&s[start..]);
    }
    chunks
}
