//! Chunking: enhanced units → bounded, deterministic [`Chunk`]s.
//!
//! ## Rules
//!
//! ```text
//! text  text  text │ table │ image │ text ...      (one document, in order)
//! └── joined ──┘     own     own
//! ```
//!
//! * Unit text is normalised first; units that normalise to nothing are
//!   dropped.
//! * Adjacent text units on the same page with the same strategy are joined
//!   with a blank line while the result stays within the bound.
//! * Table and image units are chunks of their own.
//! * Anything longer than the bound is split; the cut prefers the last
//!   whitespace in the second half of the window and falls back to a hard
//!   cut at the bound. Nothing is dropped.
//!
//! Ids hash the source path with the chunk ordinal, so re-indexing an
//! unchanged file overwrites its previous chunks in the store.

use crate::document::{Document, UnitKind};
use crate::normalize::normalize_text;
use crate::output::{Chunk, ChunkMetadata};
use crate::strategy::{EnhancedContent, Strategy};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Hex characters kept from the id digest.
const ID_HEX_LEN: usize = 32;

/// Smallest accepted bound, in characters.
pub const MIN_CHUNK_SIZE: usize = 64;

/// Split `contents` of `document` into chunks of at most `max_chunk_size`
/// characters, stamped with the current time.
pub fn chunk_document(
    document: &Document,
    contents: &[EnhancedContent],
    max_chunk_size: usize,
) -> Vec<Chunk> {
    chunk_document_at(document, contents, max_chunk_size, Utc::now())
}

/// [`chunk_document`] with an explicit `indexed_at` timestamp.
pub fn chunk_document_at(
    document: &Document,
    contents: &[EnhancedContent],
    max_chunk_size: usize,
    indexed_at: DateTime<Utc>,
) -> Vec<Chunk> {
    let max = max_chunk_size.max(MIN_CHUNK_SIZE);
    let mut pieces: Vec<Piece> = Vec::new();
    let mut pending: Option<Piece> = None;

    for content in contents {
        let text = normalize_text(&content.text);
        if text.is_empty() {
            continue;
        }
        let piece = Piece {
            page: content.unit.position.page,
            index: content.unit.position.index,
            kind: content.unit.kind(),
            strategy: content.strategy,
            text,
        };

        if piece.kind != UnitKind::Text {
            flush(&mut pending, &mut pieces, max);
            split_piece(piece, max, &mut pieces);
            continue;
        }

        match pending.as_mut() {
            Some(p) if p.joins(&piece, max) => {
                p.text.push_str("\n\n");
                p.text.push_str(&piece.text);
            }
            _ => {
                flush(&mut pending, &mut pieces, max);
                pending = Some(piece);
            }
        }
    }
    flush(&mut pending, &mut pieces, max);

    let source_path = document.path.to_string_lossy().into_owned();
    let file_name = document.file_name();
    pieces
        .into_iter()
        .enumerate()
        .map(|(ordinal, p)| Chunk {
            id: chunk_id(&source_path, ordinal),
            text: p.text,
            metadata: ChunkMetadata {
                source_path: source_path.clone(),
                file_name: file_name.clone(),
                format: document.format,
                page: p.page,
                index: p.index,
                kind: p.kind,
                strategy: p.strategy,
                ordinal,
                indexed_at,
            },
        })
        .collect()
}

/// Deterministic chunk id: truncated hex SHA-256 of path and ordinal.
pub fn chunk_id(source_path: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(ordinal.to_le_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ID_HEX_LEN);
    id
}

struct Piece {
    page: usize,
    index: usize,
    kind: UnitKind,
    strategy: Strategy,
    text: String,
}

impl Piece {
    fn joins(&self, next: &Piece, max: usize) -> bool {
        self.kind == UnitKind::Text
            && self.page == next.page
            && self.strategy == next.strategy
            && char_len(&self.text) + 2 + char_len(&next.text) <= max
    }
}

fn flush(pending: &mut Option<Piece>, out: &mut Vec<Piece>, max: usize) {
    if let Some(p) = pending.take() {
        split_piece(p, max, out);
    }
}

fn split_piece(piece: Piece, max: usize, out: &mut Vec<Piece>) {
    for text in split_text(&piece.text, max) {
        out.push(Piece {
            text,
            page: piece.page,
            index: piece.index,
            kind: piece.kind,
            strategy: piece.strategy,
        });
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into parts of at most `max` characters.
///
/// A cut lands after the last whitespace in the second half of the window
/// when there is one; otherwise exactly at `max` characters.
pub(crate) fn split_text(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut parts = Vec::new();
    let mut rest = text.trim();

    while char_len(rest) > max {
        // Byte offset of the char just past the window.
        let window_end = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let half = rest
            .char_indices()
            .nth(max / 2)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let window = &rest[..window_end];
        let cut = window[half..]
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .last()
            .map(|(i, _)| half + i)
            .filter(|&i| i > 0)
            .unwrap_or(window_end);

        let head = rest[..cut].trim_end();
        if !head.is_empty() {
            parts.push(head.to_string());
        }
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}
