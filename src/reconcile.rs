//! Chunk store reconciliation
//!
//! After a successful call the stored hashes of `(doc_id, space)` equal the
//! new hashes exactly. Deletes run before upserts; a crash in between is
//! repaired by re-running with the same input.

use crate::chunk::ChunkDraft;
use crate::embed::EmbeddingAdapter;
use crate::error::{Error, Result};
use crate::store::{ChunkRow, ChunkStore};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Row-level effect of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Vectors computed by this call
    pub embedded: usize,
}

/// Document fields copied onto every chunk row
#[derive(Debug, Clone, Default)]
pub struct ChunkContext {
    pub doc_id: String,
    pub title: Option<String>,
    pub source_url: Option<String>,
}

/// Applies delete+upsert diffs to one chunk store
#[derive(Clone)]
pub struct ChunkReconciler {
    store: Arc<dyn ChunkStore>,
}

impl ChunkReconciler {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Make the stored chunk set of `doc_id` equal `rows`
    pub async fn replace_chunks(&self, doc_id: &str, rows: &[ChunkRow]) -> Result<ReconcileOutcome> {
        if let Some(stray) = rows.iter().find(|r| r.doc_id != doc_id) {
            return Err(Error::Other(format!(
                "Chunk row for '{}' passed while reconciling '{}'",
                stray.doc_id, doc_id
            )));
        }

        let existing = self.store.existing_hashes(doc_id).await?;
        let new_hashes: HashSet<&str> = rows.iter().map(|r| r.chunk_hash.as_str()).collect();

        let deleted = self.delete_stale(doc_id, &existing, &new_hashes).await?;
        self.store.upsert_rows(rows).await?;

        let inserted = new_hashes
            .iter()
            .filter(|h| !existing.contains(**h))
            .count();
        let outcome = ReconcileOutcome {
            inserted,
            deleted,
            unchanged: new_hashes.len() - inserted,
            embedded: 0,
        };
        debug!(doc_id, ?outcome, "Replaced chunks");
        Ok(outcome)
    }

    /// Embed every draft again and replace the stored set with the result
    pub async fn rebuild_chunks(
        &self,
        context: &ChunkContext,
        drafts: &[ChunkDraft],
        adapter: &EmbeddingAdapter,
    ) -> Result<ReconcileOutcome> {
        self.check_space(adapter)?;

        let mut seen = HashSet::new();
        let unique: Vec<&ChunkDraft> = drafts
            .iter()
            .filter(|d| seen.insert(d.hash.as_str()))
            .collect();

        let rows = build_rows(context, &unique, adapter).await?;
        let mut outcome = self.replace_chunks(&context.doc_id, &rows).await?;
        outcome.embedded = rows.len();
        Ok(outcome)
    }

    /// Like [`replace_chunks`](Self::replace_chunks), but only embeds drafts
    /// whose hash is not stored yet. Unchanged chunks keep their vectors and
    /// take the current title and URL.
    pub async fn sync_chunks(
        &self,
        context: &ChunkContext,
        drafts: &[ChunkDraft],
        adapter: &EmbeddingAdapter,
    ) -> Result<ReconcileOutcome> {
        self.check_space(adapter)?;

        let doc_id = context.doc_id.as_str();
        let existing = self.store.existing_hashes(doc_id).await?;

        let mut seen = HashSet::new();
        let missing: Vec<&ChunkDraft> = drafts
            .iter()
            .filter(|d| seen.insert(d.hash.as_str()) && !existing.contains(&d.hash))
            .collect();

        // Embed before touching the store so a provider failure leaves it as is
        let rows = build_rows(context, &missing, adapter).await?;

        let deleted = self.delete_stale(doc_id, &existing, &seen).await?;
        self.store.upsert_rows(&rows).await?;

        let mut kept: Vec<String> = existing
            .iter()
            .filter(|h| seen.contains(h.as_str()))
            .cloned()
            .collect();
        kept.sort();
        self.store
            .refresh_details(
                doc_id,
                &kept,
                context.title.as_deref(),
                context.source_url.as_deref(),
            )
            .await?;

        let outcome = ReconcileOutcome {
            inserted: rows.len(),
            deleted,
            unchanged: kept.len(),
            embedded: rows.len(),
        };
        debug!(doc_id, ?outcome, "Synced chunks");
        Ok(outcome)
    }

    fn check_space(&self, adapter: &EmbeddingAdapter) -> Result<()> {
        if adapter.space() != self.store.space() {
            return Err(Error::Config(format!(
                "Embedding space '{}' does not match chunk store space '{}'",
                adapter.space(),
                self.store.space()
            )));
        }
        Ok(())
    }

    async fn delete_stale(
        &self,
        doc_id: &str,
        existing: &HashSet<String>,
        keep: &HashSet<&str>,
    ) -> Result<usize> {
        let mut to_delete: Vec<String> = existing
            .iter()
            .filter(|h| !keep.contains(h.as_str()))
            .cloned()
            .collect();
        if to_delete.is_empty() {
            return Ok(0);
        }
        to_delete.sort();
        self.store.delete_hashes(doc_id, &to_delete).await?;
        Ok(to_delete.len())
    }
}

async fn build_rows(
    context: &ChunkContext,
    drafts: &[&ChunkDraft],
    adapter: &EmbeddingAdapter,
) -> Result<Vec<ChunkRow>> {
    let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
    let vectors = adapter.embed(&texts).await?;

    let ingested_at = Utc::now().to_rfc3339();
    Ok(drafts
        .iter()
        .zip(vectors)
        .map(|(draft, embedding)| ChunkRow {
            doc_id: context.doc_id.clone(),
            source_url: context.source_url.clone(),
            title: context.title.clone(),
            chunk_text: draft.text.clone(),
            chunk_hash: draft.hash.clone(),
            embedding,
            ingested_at: ingested_at.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_document;
    use crate::config::ChunkConfig;
    use crate::datastore::{Datastore, RetryPolicy};
    use crate::embed::{EmbeddingProvider, EmbeddingSpace, ProviderKind};
    use crate::store::SqliteChunkStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProvider {
        embedded: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn space() -> EmbeddingSpace {
        EmbeddingSpace {
            provider: ProviderKind::Http,
            model: "counting".to_string(),
            version: "v1".to_string(),
            dimension: 2,
        }
    }

    fn row(doc_id: &str, hash: &str) -> ChunkRow {
        ChunkRow {
            doc_id: doc_id.to_string(),
            source_url: None,
            title: None,
            chunk_text: format!("text {hash}"),
            chunk_hash: hash.to_string(),
            embedding: vec![1.0, 2.0],
            ingested_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    async fn setup() -> (ChunkReconciler, TempDir) {
        let tmp = TempDir::new().unwrap();
        let datastore = Datastore::open(&tmp.path().join("test.db")).await.unwrap();
        let store = SqliteChunkStore::new(datastore.pool().clone(), space(), RetryPolicy::none());
        store.ensure_space().await.unwrap();
        (ChunkReconciler::new(Arc::new(store)), tmp)
    }

    #[tokio::test]
    async fn test_replace_twice_is_a_noop() {
        let (reconciler, _tmp) = setup().await;
        let rows = vec![row("doc-1", "a"), row("doc-1", "b")];

        let first = reconciler.replace_chunks("doc-1", &rows).await.unwrap();
        assert_eq!(first.inserted, 2);

        let before = reconciler.store().chunks_for_document("doc-1").await.unwrap();
        let second = reconciler.replace_chunks("doc-1", &rows).await.unwrap();
        let after = reconciler.store().chunks_for_document("doc-1").await.unwrap();

        assert_eq!(
            second,
            ReconcileOutcome {
                inserted: 0,
                deleted: 0,
                unchanged: 2,
                embedded: 0,
            }
        );
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_replace_removes_orphans_only_for_document() {
        let (reconciler, _tmp) = setup().await;
        reconciler
            .replace_chunks("doc-1", &[row("doc-1", "a"), row("doc-1", "b")])
            .await
            .unwrap();
        reconciler
            .replace_chunks("doc-2", &[row("doc-2", "a")])
            .await
            .unwrap();

        let outcome = reconciler
            .replace_chunks("doc-1", &[row("doc-1", "b"), row("doc-1", "c")])
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.deleted, 1);

        let hashes = reconciler.store().existing_hashes("doc-1").await.unwrap();
        let expected: HashSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(hashes, expected);
        assert!(reconciler.store().has_chunks("doc-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_rejects_foreign_rows() {
        let (reconciler, _tmp) = setup().await;
        assert!(reconciler
            .replace_chunks("doc-1", &[row("doc-2", "a")])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sync_embeds_only_new_chunks() {
        let (reconciler, _tmp) = setup().await;
        let provider = Arc::new(CountingProvider {
            embedded: AtomicUsize::new(0),
        });
        let adapter = EmbeddingAdapter::new(provider.clone(), space(), 16);
        let config = ChunkConfig {
            max_tokens: 20,
            overlap_tokens: 4,
        };
        let context = ChunkContext {
            doc_id: "doc-1".to_string(),
            ..ChunkContext::default()
        };

        let text: String = (0..60).map(|i| format!("word{i} ")).collect();
        let drafts = chunk_document("doc-1", &text, &config);
        let first = reconciler.sync_chunks(&context, &drafts, &adapter).await.unwrap();
        assert_eq!(first.inserted, drafts.len());
        assert_eq!(provider.embedded.load(Ordering::SeqCst), drafts.len());

        // identical input embeds nothing
        let again = reconciler.sync_chunks(&context, &drafts, &adapter).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.deleted, 0);
        assert_eq!(provider.embedded.load(Ordering::SeqCst), drafts.len());

        // an appended tail only embeds the chunks that changed
        let edited = format!("{text} extra words at the end");
        let new_drafts = chunk_document("doc-1", &edited, &config);
        let outcome = reconciler
            .sync_chunks(&context, &new_drafts, &adapter)
            .await
            .unwrap();
        assert!(outcome.unchanged > 0);
        let stored = reconciler.store().existing_hashes("doc-1").await.unwrap();
        let expected: HashSet<String> = new_drafts.iter().map(|d| d.hash.clone()).collect();
        assert_eq!(stored, expected);
    }

    fn counting_setup() -> (Arc<CountingProvider>, EmbeddingAdapter, ChunkConfig) {
        let provider = Arc::new(CountingProvider {
            embedded: AtomicUsize::new(0),
        });
        let adapter = EmbeddingAdapter::new(provider.clone(), space(), 16);
        let config = ChunkConfig {
            max_tokens: 20,
            overlap_tokens: 4,
        };
        (provider, adapter, config)
    }

    #[tokio::test]
    async fn test_sync_refreshes_title_of_kept_chunks() {
        let (reconciler, _tmp) = setup().await;
        let (_provider, adapter, config) = counting_setup();
        let text: String = (0..60).map(|i| format!("word{i} ")).collect();

        let old = ChunkContext {
            doc_id: "doc-1".to_string(),
            title: Some("Old Title".to_string()),
            source_url: Some("https://old.test/page".to_string()),
        };
        let drafts = chunk_document("doc-1", &text, &config);
        reconciler.sync_chunks(&old, &drafts, &adapter).await.unwrap();

        let new = ChunkContext {
            title: Some("New Title".to_string()),
            source_url: Some("https://new.test/page".to_string()),
            ..old.clone()
        };
        let edited = format!("{text} extra words at the end");
        let new_drafts = chunk_document("doc-1", &edited, &config);
        let outcome = reconciler
            .sync_chunks(&new, &new_drafts, &adapter)
            .await
            .unwrap();
        assert!(outcome.unchanged > 0);

        let stored = reconciler.store().chunks_for_document("doc-1").await.unwrap();
        assert_eq!(stored.len(), new_drafts.len());
        for chunk in &stored {
            assert_eq!(chunk.title.as_deref(), Some("New Title"));
            assert_eq!(chunk.source_url.as_deref(), Some("https://new.test/page"));
        }
    }

    #[tokio::test]
    async fn test_rebuild_embeds_every_chunk_again() {
        let (reconciler, _tmp) = setup().await;
        let (provider, adapter, config) = counting_setup();
        let context = ChunkContext {
            doc_id: "doc-1".to_string(),
            ..ChunkContext::default()
        };
        let text: String = (0..60).map(|i| format!("word{i} ")).collect();
        let drafts = chunk_document("doc-1", &text, &config);

        reconciler.sync_chunks(&context, &drafts, &adapter).await.unwrap();
        let before = reconciler.store().existing_hashes("doc-1").await.unwrap();

        let outcome = reconciler
            .rebuild_chunks(&context, &drafts, &adapter)
            .await
            .unwrap();
        assert_eq!(outcome.embedded, drafts.len());
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(provider.embedded.load(Ordering::SeqCst), drafts.len() * 2);
        assert_eq!(
            reconciler.store().existing_hashes("doc-1").await.unwrap(),
            before
        );
    }
}
