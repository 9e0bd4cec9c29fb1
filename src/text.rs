//! Text cleanup and chunking primitives shared by the loader and chunker
//! handlers.
//!
//! Loaders strip the noise that web extraction leaves behind (runs of spaces,
//! stacked blank lines) before documents enter the pipeline. The chunker uses
//! [`TextSplitter`], a recursive character splitter: it prefers to break on
//! paragraph boundaries, then lines, then words, and only falls back to
//! hard character cuts for pathological unbroken runs. Adjacent small pieces
//! are merged back together up to the target chunk size, carrying a
//! configurable overlap between consecutive chunks.

use once_cell::sync::Lazy;
use regex::Regex;

static DUPLICATE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").expect("valid regex"));
static DUPLICATE_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\n\s*)+\n").expect("valid regex"));

/// Collapses runs of spaces and stacked blank lines.
pub fn clean_text_body(text: &str) -> String {
    strip_duplicate_newlines(&strip_duplicate_whitespace(text))
}

/// Collapses runs of spaces into single spaces.
pub fn strip_duplicate_whitespace(text: &str) -> String {
    DUPLICATE_SPACES.replace_all(text, " ").into_owned()
}

/// Collapses two or more (possibly blank-padded) newlines into a paragraph
/// break.
pub fn strip_duplicate_newlines(text: &str) -> String {
    DUPLICATE_NEWLINES.replace_all(text, "\n\n").into_owned()
}

/// Recursive character text splitter.
///
/// Sizes are measured in characters. The overlap is clamped below the chunk
/// size so splitting always makes progress.
#[derive(Clone, Debug)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Splits `text` into chunks of at most `chunk_size` characters.
    ///
    /// Empty input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, rest) = pick_separator(text, separators);
        if separator.is_empty() {
            return self.char_chunks(text);
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;
        let sep_len = separator.chars().count();

        for piece in text.split(separator).filter(|piece| !piece.is_empty()) {
            let piece_len = piece.chars().count();

            if piece_len > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.join(separator));
                    current.clear();
                    current_len = 0;
                }
                chunks.extend(self.split_recursive(piece, rest));
                continue;
            }

            let join_len = if current.is_empty() { 0 } else { sep_len };
            if current_len + join_len + piece_len > self.chunk_size && !current.is_empty() {
                chunks.push(current.join(separator));
                // Drop pieces from the front until the retained overlap plus
                // the new piece fits. Popping everything is the worst case.
                while !current.is_empty()
                    && (current_len > self.chunk_overlap
                        || current_len + sep_len + piece_len > self.chunk_size)
                {
                    let removed = current.remove(0).chars().count();
                    let trailing_sep = if current.is_empty() { 0 } else { sep_len };
                    current_len = current_len.saturating_sub(removed + trailing_sep);
                }
            }

            let join_len = if current.is_empty() { 0 } else { sep_len };
            current_len += join_len + piece_len;
            current.push(piece.to_string());
        }

        if !current.is_empty() {
            chunks.push(current.join(separator));
        }
        chunks
    }

    fn char_chunks(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = (self.chunk_size - self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

/// Picks the first separator that occurs in `text`, falling back to the
/// character-level split.
fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (idx, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (separator, &separators[idx + 1..]);
        }
    }
    ("", &[])
}
