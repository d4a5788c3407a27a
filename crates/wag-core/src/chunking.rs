//! Message chunking for WhatsApp message length limits.
//!
//! Lengths are counted in `char`s, never bytes.

const SENTENCE_DELIMITERS: [&str; 3] = [".", ";", "\n\n"];

/// Split `text` into chunks of at most `max_length` chars.
///
/// Text that already fits is returned untouched as a single chunk. Longer text
/// is split at sentence boundaries (`.`, `;`, blank line) where possible; a
/// single sentence longer than the limit is cut at the last space before the
/// limit, or mid-word when there is none.
pub fn chunk_message(text: &str, max_length: usize) -> Vec<String> {
    let max_length = max_length.max(1);

    if char_len(text) <= max_length {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    for chunk in pack_sentences(&split_sentences(text), max_length) {
        if char_len(&chunk) <= max_length {
            out.push(chunk);
        } else {
            out.extend(force_split(&chunk, max_length));
        }
    }
    out
}

/// Merge adjacent chunks (joined by a blank line) while the result fits.
///
/// Order is preserved and no chunk is ever split: a chunk already longer than
/// `max_length` passes through as its own element.
pub fn combine_chunks<S: AsRef<str>>(chunks: &[S], max_length: usize) -> Vec<String> {
    let mut combined = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for chunk in chunks {
        let chunk = chunk.as_ref();
        let chunk_len = char_len(chunk);
        let separator = if current.is_empty() { "" } else { "\n\n" };

        if current_len + separator.len() + chunk_len <= max_length {
            current.push_str(separator);
            current.push_str(chunk);
            current_len += separator.len() + chunk_len;
        } else {
            if !current.is_empty() {
                combined.push(std::mem::take(&mut current));
            }
            current.push_str(chunk);
            current_len = chunk_len;
        }
    }

    if !current.is_empty() {
        combined.push(current);
    }
    combined
}

/// Scan `text` into trimmed sentence-like units, each keeping its trailing delimiter.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < text.len() {
        let rest = &text[i..];
        match SENTENCE_DELIMITERS.iter().find(|d| rest.starts_with(**d)) {
            Some(delim) => {
                let end = i + delim.len();
                push_unit(&mut units, &text[start..end]);
                start = end;
                i = end;
            }
            None => {
                // Advance one char; delimiters are ASCII so any boundary works.
                i += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
    }
    push_unit(&mut units, &text[start..]);
    units
}

fn push_unit<'a>(units: &mut Vec<&'a str>, raw: &'a str) {
    let unit = raw.trim();
    if !unit.is_empty() {
        units.push(unit);
    }
}

/// Greedily join units with single spaces into chunks of at most `max_length`.
fn pack_sentences(units: &[&str], max_length: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for unit in units {
        let unit_len = char_len(unit);
        let sep_len = usize::from(!current.is_empty());

        if current_len + sep_len + unit_len <= max_length {
            if sep_len == 1 {
                current.push(' ');
            }
            current.push_str(unit);
            current_len += sep_len + unit_len;
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(unit);
            current_len = unit_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Hard-split text that has no sentence boundary within the limit.
fn force_split(text: &str, max_length: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while char_len(remaining) > max_length {
        let window_end = byte_offset(remaining, max_length);
        // A space at index 0 would produce an empty piece and no progress.
        let split_at = match remaining[..window_end].rfind(' ') {
            Some(idx) if idx > 0 => idx,
            _ => window_end,
        };
        chunks.push(remaining[..split_at].trim().to_string());
        remaining = remaining[split_at..].trim();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th char (or the end of the string).
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(idx, _)| idx)
}
