//! Paragraph-boundary text chunker and the [`Chunker`] collaborator trait.
//!
//! Splits extracted text into [`Chunk`]s that respect a configurable
//! character budget. Splitting occurs on paragraph boundaries (`\n\n`) to
//! keep each chunk coherent, and a tail of each chunk is carried into the
//! next one so that sentences crossing a boundary stay retrievable.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` / `overlap_tokens` to chars using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`.
//! 4. When exceeded, flush the buffer as a chunk and seed the next buffer
//!    with the last `overlap_chars` of the flushed text (snapped to a word).
//! 5. If a single paragraph exceeds `max_chars`, hard-split it at the
//!    nearest newline or space boundary.
//! 6. Whitespace-only input produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use lesson_harness_core::chunk::{chunk_text, ChunkSpec};
//!
//! let spec = ChunkSpec { max_tokens: 250, overlap_tokens: 0 };
//! let pieces = chunk_text("Hello world.\n\nSecond paragraph.", &spec);
//! assert_eq!(pieces.len(), 1);
//! ```

use crate::models::{sha256_hex, Chunk, SourceFile};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunk size settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkSpec {
    fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(1)
    }

    fn overlap_chars(&self) -> usize {
        // Overlap never reaches a full chunk, or splitting could stall.
        (self.overlap_tokens * CHARS_PER_TOKEN).min(self.max_chars() / 2)
    }
}

impl Default for ChunkSpec {
    /// ~1000 characters with ~200 characters of overlap.
    fn default() -> Self {
        Self {
            max_tokens: 250,
            overlap_tokens: 50,
        }
    }
}

/// Turns one source file into an ordered sequence of chunks.
///
/// Implementations must be deterministic for identical file content. An
/// error means the file could not be parsed; the rebuild coordinator then
/// aborts the whole subject rather than indexing it partially.
pub trait Chunker: Send + Sync {
    fn chunk(&self, file: &SourceFile) -> anyhow::Result<Vec<Chunk>>;
}

/// Split text into chunk bodies on paragraph boundaries.
///
/// Returned strings are trimmed and never empty.
pub fn chunk_text(text: &str, spec: &ChunkSpec) -> Vec<String> {
    let max_chars = spec.max_chars();
    let overlap_chars = spec.overlap_chars();

    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    // Bytes of `buf` that are only carried-over overlap.
    let mut carried = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && buf.len() > carried {
            flush(&mut out, &mut buf, &mut carried, overlap_chars);
        }

        if trimmed.len() > max_chars {
            if buf.len() > carried {
                flush(&mut out, &mut buf, &mut carried, overlap_chars);
            }
            buf.clear();
            carried = 0;
            for piece in hard_split(trimmed, max_chars, overlap_chars) {
                out.push(piece);
            }
            if let Some(last) = out.last() {
                let tail = overlap_tail(last, overlap_chars);
                buf.push_str(tail);
                carried = buf.len();
            }
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    if buf.len() > carried {
        out.push(buf.trim().to_string());
    }

    out
}

/// Chunk a whole unit (page, section) of a source file into [`Chunk`]s.
///
/// `first_index` is the chunk index to assign to the first produced chunk,
/// so indices stay contiguous across the units of one file.
pub fn chunk_unit(
    source: &str,
    locator: &str,
    text: &str,
    spec: &ChunkSpec,
    first_index: usize,
) -> Vec<Chunk> {
    chunk_text(text, spec)
        .into_iter()
        .enumerate()
        .map(|(i, body)| make_chunk(source, locator, first_index + i, body))
        .collect()
}

fn flush(out: &mut Vec<String>, buf: &mut String, carried: &mut usize, overlap_chars: usize) {
    let body = buf.trim().to_string();
    let tail = overlap_tail(&body, overlap_chars).to_string();
    out.push(body);
    buf.clear();
    buf.push_str(&tail);
    *carried = buf.len();
}

/// Hard-split an oversized paragraph, overlapping adjacent pieces.
fn hard_split(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            break;
        }

        let limit = snap_to_char_boundary(remaining, max_chars);
        let split_at = remaining[..limit]
            .rfind('\n')
            .or_else(|| remaining[..limit].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        let split_at = if split_at == 0 {
            next_char_boundary(remaining)
        } else {
            split_at
        };

        let body = remaining[..split_at].trim_end();
        let piece = body.trim_start();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        // Resume at the start of the overlap tail, always making progress.
        let next = body.len() - overlap_tail(body, overlap_chars).len();
        let next = if next == 0 { split_at } else { next };
        remaining = &remaining[next..];
    }

    pieces
}

/// The last `overlap_chars` bytes of `text`, starting on a word boundary.
///
/// Empty when no word boundary falls inside that window.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if overlap_chars == 0 || text.is_empty() {
        return "";
    }
    if text.len() <= overlap_chars {
        return text;
    }
    let mut start = text.len() - overlap_chars;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => "",
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

/// Create a single [`Chunk`] with a SHA-256 content hash.
fn make_chunk(source: &str, locator: &str, index: usize, text: String) -> Chunk {
    Chunk {
        source: source.to_string(),
        locator: locator.to_string(),
        chunk_index: index,
        hash: sha256_hex(text.as_bytes()),
        text,
    }
}
