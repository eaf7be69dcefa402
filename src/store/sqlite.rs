//! SQLite chunk store: one `chunks_<space>` table per embedding space

use super::{ChunkRow, ChunkStore};
use crate::datastore::{chunk_table_sql, RetryPolicy};
use crate::embed::EmbeddingSpace;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::collections::HashSet;
use tracing::debug;

/// Chunk store backed by the local SQLite database
#[derive(Clone)]
pub struct SqliteChunkStore {
    pool: SqlitePool,
    space: EmbeddingSpace,
    table: String,
    retry: RetryPolicy,
}

#[derive(Debug, FromRow)]
struct StoredChunk {
    doc_id: String,
    chunk_hash: String,
    source_url: Option<String>,
    title: Option<String>,
    chunk_text: String,
    embedding: Vec<u8>,
    ingested_at: String,
}

impl From<StoredChunk> for ChunkRow {
    fn from(row: StoredChunk) -> Self {
        Self {
            doc_id: row.doc_id,
            source_url: row.source_url,
            title: row.title,
            chunk_text: row.chunk_text,
            chunk_hash: row.chunk_hash,
            embedding: decode_embedding(&row.embedding),
            ingested_at: row.ingested_at,
        }
    }
}

/// Little-endian f32 encoding of a vector
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Table holding a space's chunks
pub fn chunk_table_name(space: &EmbeddingSpace) -> String {
    format!("chunks_{}", space.slug())
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool, space: EmbeddingSpace, retry: RetryPolicy) -> Self {
        let table = chunk_table_name(&space);
        Self {
            pool,
            space,
            table,
            retry,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn ensure_space(&self) -> Result<()> {
        debug!(table = %self.table, "Ensuring chunk table");
        sqlx::query(&chunk_table_sql(&self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn existing_hashes(&self, doc_id: &str) -> Result<HashSet<String>> {
        let pool = &self.pool;
        let sql = format!("SELECT chunk_hash FROM {} WHERE doc_id = ?", self.table);
        let sql = sql.as_str();

        let hashes: Vec<String> = self
            .retry
            .run("existing_hashes", move || async move {
                sqlx::query_scalar(sql)
                    .bind(doc_id)
                    .fetch_all(pool)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        Ok(hashes.into_iter().collect())
    }

    async fn delete_hashes(&self, doc_id: &str, hashes: &[String]) -> Result<u64> {
        if hashes.is_empty() {
            return Ok(0);
        }

        let pool = &self.pool;
        let placeholders = hashes.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "DELETE FROM {} WHERE doc_id = ? AND chunk_hash IN ({})",
            self.table, placeholders
        );
        let sql = sql.as_str();

        self.retry
            .run("delete_chunks", move || async move {
                let mut query = sqlx::query(sql).bind(doc_id);
                for hash in hashes {
                    query = query.bind(hash);
                }
                query
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(Error::from)
            })
            .await
    }

    async fn upsert_rows(&self, rows: &[ChunkRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let pool = &self.pool;
        let sql = format!(
            r#"
            INSERT INTO {} (doc_id, chunk_hash, source_url, title, chunk_text, embedding, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(doc_id, chunk_hash) DO UPDATE SET
                source_url = excluded.source_url,
                title = excluded.title,
                embedding = excluded.embedding
            "#,
            self.table
        );
        let sql = sql.as_str();

        self.retry
            .run("upsert_chunks", move || async move {
                let mut tx = pool.begin().await.map_err(Error::from)?;
                for row in rows {
                    sqlx::query(sql)
                        .bind(&row.doc_id)
                        .bind(&row.chunk_hash)
                        .bind(&row.source_url)
                        .bind(&row.title)
                        .bind(&row.chunk_text)
                        .bind(encode_embedding(&row.embedding))
                        .bind(&row.ingested_at)
                        .execute(&mut *tx)
                        .await
                        .map_err(Error::from)?;
                }
                tx.commit().await.map_err(Error::from)?;
                Ok::<(), Error>(())
            })
            .await
    }

    async fn refresh_details(
        &self,
        doc_id: &str,
        hashes: &[String],
        title: Option<&str>,
        source_url: Option<&str>,
    ) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        let pool = &self.pool;
        let placeholders = hashes.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE {} SET title = ?, source_url = ? WHERE doc_id = ? AND chunk_hash IN ({})",
            self.table, placeholders
        );
        let sql = sql.as_str();

        self.retry
            .run("refresh_chunk_details", move || async move {
                let mut query = sqlx::query(sql).bind(title).bind(source_url).bind(doc_id);
                for hash in hashes {
                    query = query.bind(hash);
                }
                query.execute(pool).await.map_err(Error::from)?;
                Ok::<(), Error>(())
            })
            .await
    }

    async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<ChunkRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE doc_id = ? ORDER BY chunk_hash",
            self.table
        );
        let rows = sqlx::query_as::<_, StoredChunk>(&sql)
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ChunkRow::from).collect())
    }

    async fn count_chunks(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Datastore;
    use crate::embed::ProviderKind;
    use tempfile::TempDir;

    fn space(version: &str) -> EmbeddingSpace {
        EmbeddingSpace {
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            version: version.to_string(),
            dimension: 2,
        }
    }

    fn row(doc_id: &str, hash: &str) -> ChunkRow {
        ChunkRow {
            doc_id: doc_id.to_string(),
            source_url: None,
            title: Some("T".to_string()),
            chunk_text: format!("text {hash}"),
            chunk_hash: hash.to_string(),
            embedding: vec![0.25, -1.5],
            ingested_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    async fn setup(version: &str) -> (SqliteChunkStore, Datastore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let datastore = Datastore::open(&tmp.path().join("test.db")).await.unwrap();
        let store = SqliteChunkStore::new(datastore.pool().clone(), space(version), RetryPolicy::none());
        store.ensure_space().await.unwrap();
        (store, datastore, tmp)
    }

    #[test]
    fn test_embedding_encoding() {
        let v = vec![1.0f32, -0.5, 3.25];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_doc_and_hash() {
        let (store, _ds, _tmp) = setup("v1").await;
        store
            .upsert_rows(&[row("doc-1", "a"), row("doc-1", "b"), row("doc-2", "a")])
            .await
            .unwrap();
        store.upsert_rows(&[row("doc-1", "a")]).await.unwrap();

        assert_eq!(store.count_chunks().await.unwrap(), 3);
        let chunks = store.chunks_for_document("doc-1").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].embedding, vec![0.25, -1.5]);
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_document() {
        let (store, _ds, _tmp) = setup("v1").await;
        store
            .upsert_rows(&[row("doc-1", "a"), row("doc-2", "a")])
            .await
            .unwrap();

        let deleted = store
            .delete_hashes("doc-1", &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(!store.has_chunks("doc-1").await.unwrap());
        assert!(store.has_chunks("doc-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_details_keeps_vectors() {
        let (store, _ds, _tmp) = setup("v1").await;
        store
            .upsert_rows(&[row("doc-1", "a"), row("doc-1", "b"), row("doc-2", "a")])
            .await
            .unwrap();

        store
            .refresh_details("doc-1", &["a".to_string()], Some("New"), Some("https://x.test"))
            .await
            .unwrap();

        let chunks = store.chunks_for_document("doc-1").await.unwrap();
        assert_eq!(chunks[0].title.as_deref(), Some("New"));
        assert_eq!(chunks[0].source_url.as_deref(), Some("https://x.test"));
        assert_eq!(chunks[0].embedding, vec![0.25, -1.5]);
        assert_eq!(chunks[1].title.as_deref(), Some("T"));
        let other = store.chunks_for_document("doc-2").await.unwrap();
        assert_eq!(other[0].title.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_spaces_are_disjoint() {
        let (v1, datastore, _tmp) = setup("v1").await;
        let v2 = SqliteChunkStore::new(datastore.pool().clone(), space("v2"), RetryPolicy::none());
        v2.ensure_space().await.unwrap();
        assert_ne!(v1.table(), v2.table());

        v1.upsert_rows(&[row("doc-1", "a")]).await.unwrap();
        assert!(v1.has_chunks("doc-1").await.unwrap());
        assert!(!v2.has_chunks("doc-1").await.unwrap());
    }
}
