//! Token-bounded text chunking
//!
//! This module splits normalized plain text into overlapping chunks:
//! - Words are whitespace-delimited and never split
//! - Chunk size is bounded by an estimated token count
//! - Each chunk after the first starts with a suffix of the previous one
//! - Boundaries are deterministic, since chunk hashes depend on them

use crate::config::ChunkConfig;
use crate::hashing::{compute_chunk_hash, normalize_plain_text};
use std::collections::HashSet;

/// Default maximum tokens per chunk
pub const DEFAULT_MAX_TOKENS: usize = 450;

/// Default overlap tokens between consecutive chunks
pub const DEFAULT_OVERLAP_TOKENS: usize = 75;

/// A chunk ready to be embedded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    /// Position within the document (0-based, after de-duplication)
    pub index: usize,

    /// The chunk text
    pub text: String,

    /// Hash of `docId:text`
    pub hash: String,
}

/// Estimate the tokens a word costs, trailing space included.
///
/// Roughly four characters per token, never less than one.
pub fn estimate_tokens(word: &str) -> usize {
    let chars = word.chars().count() + 1;
    chars.div_ceil(4).max(1)
}

/// Split text into chunks of at most `max_tokens` estimated tokens, each
/// seeded with at least `overlap` tokens from the end of the previous chunk.
///
/// A single word larger than `max_tokens` is emitted on its own rather than
/// truncated. Empty or whitespace-only input yields no chunks.
pub fn chunk_by_tokens(text: &str, max_tokens: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for word in words {
        let cost = estimate_tokens(word);

        if !current.is_empty() && current_tokens + cost > max_tokens {
            chunks.push(current.join(" "));

            // Walk back from the end until the carried suffix covers `overlap`
            let mut start = current.len();
            let mut carried = 0usize;
            while start > 0 && carried < overlap {
                start -= 1;
                carried += estimate_tokens(current[start]);
            }
            current.drain(..start);
            current_tokens = carried;

            // The carried suffix must leave room for the incoming word
            while !current.is_empty() && current_tokens + cost > max_tokens {
                current_tokens -= estimate_tokens(current[0]);
                current.remove(0);
            }
        }

        current.push(word);
        current_tokens += cost;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Chunk a document's plain text and attach per-chunk hashes.
///
/// Text is normalized first. Identical chunk texts within a document share a
/// hash, so only the first occurrence is kept.
pub fn chunk_document(doc_id: &str, plain_text: &str, config: &ChunkConfig) -> Vec<ChunkDraft> {
    let normalized = normalize_plain_text(plain_text);
    let mut seen = HashSet::new();

    chunk_by_tokens(&normalized, config.max_tokens, config.overlap_tokens)
        .into_iter()
        .filter_map(|text| {
            let hash = compute_chunk_hash(doc_id, &text);
            seen.insert(hash.clone()).then_some((text, hash))
        })
        .enumerate()
        .map(|(index, (text, hash))| ChunkDraft { index, text, hash })
        .collect()
}
