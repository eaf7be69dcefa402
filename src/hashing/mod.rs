//! Content hashing and metadata normalization
//!
//! Everything here is a pure function. Hashes drive change detection only,
//! so a fast deterministic hash is all that is needed; blake3 keeps
//! collisions out of reach, which matters because a false "unchanged"
//! would silently skip re-ingestion.

mod metadata;

pub use metadata::*;

use blake3::Hasher;

/// Collapse every run of whitespace into a single space and trim the ends.
///
/// Both the content hash and the chunker see text through this function,
/// so formatting-only edits (re-wrapped lines, CRLF vs LF) never count as
/// content changes.
pub fn normalize_plain_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn scoped_hash(doc_id: &str, text: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Hash of a document's normalized plain text, scoped to its canonical id
pub fn compute_content_hash(doc_id: &str, plain_text: &str) -> String {
    scoped_hash(doc_id, &normalize_plain_text(plain_text))
}

/// Hash of a single chunk: `docId:chunkText`
pub fn compute_chunk_hash(doc_id: &str, chunk_text: &str) -> String {
    scoped_hash(doc_id, chunk_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_text() {
        assert_eq!(normalize_plain_text("  a\r\n b\t\tc  \n\n"), "a b c");
        assert_eq!(normalize_plain_text("   "), "");
    }

    #[test]
    fn test_content_hash_ignores_whitespace_layout() {
        let a = compute_content_hash("doc-1", "Hello   world\n\nagain");
        let b = compute_content_hash("doc-1", "Hello world again");
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_hash_is_scoped_to_document() {
        let a = compute_content_hash("doc-1", "same text");
        let b = compute_content_hash("doc-2", "same text");
        assert_ne!(a, b);
        assert_ne!(a, compute_content_hash("doc-1", "other text"));
    }

    #[test]
    fn test_chunk_hash_matches_prefixed_form() {
        let expected = blake3::hash(b"doc-1:chunk body").to_hex().to_string();
        assert_eq!(compute_chunk_hash("doc-1", "chunk body"), expected);
    }
}
