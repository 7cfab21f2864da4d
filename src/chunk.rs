//! Paragraph-boundary page chunker.
//!
//! Splits one page's text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit, splitting on paragraph boundaries (`\n\n`) to keep
//! each chunk semantically coherent, with a configurable character overlap
//! carried between consecutive chunks.
//!
//! Chunk ids are the deterministic composite `file_name:page:chunk_index`,
//! so re-chunking unchanged text always reproduces the same ids and the
//! indexer can upsert instead of duplicating. Each chunk also carries a
//! SHA-256 hash of its text for staleness detection.

use sha2::{Digest, Sha256};

use crate::models::{chunk_id, Chunk};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split a page's text into chunks. Returns chunks with contiguous indices
/// starting at 0; whitespace-only pages produce no chunks.
pub fn chunk_page(
    file_name: &str,
    page: i64,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            flush_with_overlap(&mut pieces, &mut current_buf, overlap_chars);
        }

        if trimmed.len() > max_chars {
            // A single oversized paragraph: hard-split near max_chars,
            // preferring newline or space boundaries.
            if !current_buf.is_empty() {
                flush_with_overlap(&mut pieces, &mut current_buf, overlap_chars);
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = split_point(remaining, max_chars);
                let piece = remaining[..split_at].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[split_at..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.trim().is_empty() {
        pieces.push(current_buf.trim().to_string());
    }

    // Non-empty page text always yields at least one chunk
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(file_name, page, i as i64, &piece))
        .collect()
}

/// Split every page of a document.
pub fn chunk_pages(
    file_name: &str,
    pages: &[crate::models::PageText],
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|p| chunk_page(file_name, p.page, &p.text, max_tokens, overlap_tokens))
        .collect()
}

fn flush_with_overlap(pieces: &mut Vec<String>, buf: &mut String, overlap_chars: usize) {
    pieces.push(buf.clone());
    let tail = overlap_tail(buf, overlap_chars);
    buf.clear();
    buf.push_str(&tail);
}

/// The trailing `overlap_chars` of a flushed chunk, aligned to a char
/// boundary, carried into the next chunk's buffer.
fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 || text.len() <= overlap_chars {
        return String::new();
    }
    let mut start = text.len() - overlap_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim_start().to_string()
}

/// Byte offset to split `text` at, at most `max_chars`, preferring a
/// newline or space boundary and never landing inside a UTF-8 sequence.
fn split_point(text: &str, max_chars: usize) -> usize {
    if text.len() <= max_chars {
        return text.len();
    }
    let mut limit = max_chars;
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    text[..limit]
        .rfind('\n')
        .or_else(|| text[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn make_chunk(file_name: &str, page: i64, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(file_name, page, index),
        file_name: file_name.to_string(),
        page,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
