//! Chunk storage
//!
//! Chunk rows are keyed by `(doc_id, chunk_hash)` within one embedding
//! space. Two backends implement [`ChunkStore`]:
//! - SQLite, one table per space (default)
//! - Qdrant, one collection per space

mod payload;
mod qdrant;
mod sqlite;

pub use payload::*;
pub use qdrant::*;
pub use sqlite::*;

use crate::config::Config;
use crate::datastore::Datastore;
use crate::embed::EmbeddingSpace;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// One stored chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRow {
    pub doc_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub chunk_text: String,
    /// Hash of `doc_id:chunk_text`
    pub chunk_hash: String,
    pub embedding: Vec<f32>,
    pub ingested_at: String,
}

/// Row-level access to the chunks of one embedding space
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// The space this store holds
    fn space(&self) -> &EmbeddingSpace;

    /// Create the table/collection for the space if needed
    async fn ensure_space(&self) -> Result<()>;

    /// Hashes currently stored for a document
    async fn existing_hashes(&self, doc_id: &str) -> Result<HashSet<String>>;

    /// Delete chunks of `doc_id` whose hash is in `hashes`. Returns rows removed.
    async fn delete_hashes(&self, doc_id: &str, hashes: &[String]) -> Result<u64>;

    /// Upsert rows keyed by `(doc_id, chunk_hash)`
    async fn upsert_rows(&self, rows: &[ChunkRow]) -> Result<()>;

    /// Overwrite `title` and `source_url` of kept chunks without touching
    /// their text or vectors
    async fn refresh_details(
        &self,
        doc_id: &str,
        hashes: &[String],
        title: Option<&str>,
        source_url: Option<&str>,
    ) -> Result<()>;

    /// All chunks of a document, ordered by hash
    async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<ChunkRow>>;

    /// Total chunks in the space
    async fn count_chunks(&self) -> Result<u64>;

    /// Whether the space holds any chunk for a document
    async fn has_chunks(&self, doc_id: &str) -> Result<bool> {
        Ok(!self.existing_hashes(doc_id).await?.is_empty())
    }
}

/// Open the configured chunk store for a space
pub async fn open_chunk_store(
    config: &Config,
    datastore: &Datastore,
    space: &EmbeddingSpace,
) -> Result<Arc<dyn ChunkStore>> {
    let store: Arc<dyn ChunkStore> = match config.vector_store.backend.as_str() {
        "qdrant" => Arc::new(QdrantChunkStore::new(
            &config.vector_store.qdrant_url,
            &config.vector_store.collection_prefix,
            space.clone(),
        )?),
        _ => Arc::new(SqliteChunkStore::new(
            datastore.pool().clone(),
            space.clone(),
            datastore.retry(),
        )),
    };
    store.ensure_space().await?;
    Ok(store)
}
