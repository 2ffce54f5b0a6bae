//! Fixed-size, position-based text chunking.
//!
//! Lengths are counted in `char`s so multi-byte titles never split inside a code point.

use serde::{Deserialize, Serialize};

/// A bounded slice of one processed record, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Insertion order inside the index; doubles as the HNSW id.
    pub id: usize,
    /// Row of the processed catalog this chunk came from.
    pub record_index: usize,
    /// Character offset of the chunk inside the record text.
    pub offset: usize,
    pub title: String,
    pub text: String,
}

/// Split `text` into consecutive pieces of at most `chunk_size` characters, no overlap.
///
/// Returns `(char_offset, piece)` pairs. Empty input yields no pieces.
///
/// # Panics
/// Panics if `chunk_size` is zero.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<(usize, String)> {
    assert!(chunk_size > 0, "chunk_size must be positive");
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, piece)| (i * chunk_size, piece.iter().collect()))
        .collect()
}
