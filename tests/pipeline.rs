//! End-to-end ingestion scenarios over a SQLite datastore with a scripted
//! source and embedding provider.

use async_trait::async_trait;
use docsync::chunk::chunk_document;
use docsync::config::{ChunkConfig, Config};
use docsync::datastore::{Datastore, DatastoreAvailability, RetryPolicy};
use docsync::decision::IngestionType;
use docsync::embed::{EmbeddingAdapter, EmbeddingProvider, EmbeddingSpace, ProviderKind};
use docsync::error::{Error, Result};
use docsync::hashing::normalize_metadata;
use docsync::ingest::{EventSink, IngestEvent, Ingestor};
use docsync::reconcile::ChunkReconciler;
use docsync::runs::RunStatus;
use docsync::source::{DocumentIdentity, DocumentSource, SourceDocument};
use docsync::store::{ChunkStore, SqliteChunkStore};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const URL_A: &str = "https://example.com/a";

struct ScriptedProvider {
    embedded: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let bytes = t.as_bytes();
                vec![
                    bytes.len() as f32,
                    bytes.first().copied().unwrap_or(0) as f32,
                    bytes.last().copied().unwrap_or(0) as f32,
                    1.0,
                ]
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[derive(Clone)]
struct Page {
    text: String,
    title: String,
    metadata: Option<Value>,
}

struct ScriptedSource {
    order: Vec<String>,
    pages: Mutex<HashMap<String, Page>>,
    failing: HashSet<String>,
    fetch_delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedSource {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            order: pages.iter().map(|(id, _)| id.to_string()).collect(),
            pages: Mutex::new(
                pages
                    .iter()
                    .map(|(id, text)| {
                        (
                            id.to_string(),
                            Page {
                                text: text.to_string(),
                                title: "Scripted".to_string(),
                                metadata: None,
                            },
                        )
                    })
                    .collect(),
            ),
            failing: HashSet::new(),
            fetch_delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn edit(&self, id: &str, text: &str) {
        let mut pages = self.pages.lock().unwrap();
        pages.get_mut(id).unwrap().text = text.to_string();
    }

    fn set_title(&self, id: &str, title: &str) {
        let mut pages = self.pages.lock().unwrap();
        pages.get_mut(id).unwrap().title = title.to_string();
    }

    fn set_metadata(&self, id: &str, metadata: Value) {
        let mut pages = self.pages.lock().unwrap();
        pages.get_mut(id).unwrap().metadata = Some(metadata);
    }
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    fn label(&self) -> &str {
        "web"
    }

    async fn list_candidates(&self) -> Result<Vec<DocumentIdentity>> {
        Ok(self
            .order
            .iter()
            .map(|id| DocumentIdentity::new(id.clone(), id.clone()).with_url(id.clone()))
            .collect())
    }

    async fn fetch(&self, identity: &DocumentIdentity) -> Result<SourceDocument> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&identity.canonical_id) {
            return Err(Error::Source(format!(
                "HTTP 500 for {}",
                identity.canonical_id
            )));
        }
        let page = self
            .pages
            .lock()
            .unwrap()
            .get(&identity.canonical_id)
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(identity.canonical_id.clone()))?;

        Ok(SourceDocument {
            identity: identity.clone(),
            title: Some(page.title),
            plain_text: page.text,
            last_modified: None,
            metadata: page
                .metadata
                .as_ref()
                .and_then(|m| normalize_metadata(m.as_object())),
        })
    }
}

struct FailingListSource;

#[async_trait]
impl DocumentSource for FailingListSource {
    fn label(&self) -> &str {
        "notion-page"
    }

    async fn list_candidates(&self) -> Result<Vec<DocumentIdentity>> {
        Err(Error::Source("workspace root not found".to_string()))
    }

    async fn fetch(&self, identity: &DocumentIdentity) -> Result<SourceDocument> {
        Err(Error::DocumentNotFound(identity.canonical_id.clone()))
    }
}

fn space(model: &str) -> EmbeddingSpace {
    EmbeddingSpace {
        provider: ProviderKind::Http,
        model: model.to_string(),
        version: "v1".to_string(),
        dimension: 4,
    }
}

/// 24 words of two estimated tokens each: three chunks at 20/5
fn words(n: usize, prefix: &str) -> String {
    (0..n)
        .map(|i| format!("{}{:03}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
}

struct Harness {
    _tmp: TempDir,
    datastore: Datastore,
    config: Config,
    provider: Arc<ScriptedProvider>,
}

impl Harness {
    async fn new(init_schema: bool, availability: DatastoreAvailability) -> Self {
        let tmp = TempDir::new().unwrap();
        let datastore = Datastore::open(&tmp.path().join("docsync.db"))
            .await
            .unwrap()
            .with_retry(RetryPolicy::none())
            .with_availability(availability);
        if init_schema {
            datastore.init_schema().await.unwrap();
        }

        let mut config = Config::default();
        config.chunk = ChunkConfig {
            max_tokens: 20,
            overlap_tokens: 5,
        };

        Self {
            _tmp: tmp,
            datastore,
            config,
            provider: Arc::new(ScriptedProvider {
                embedded: AtomicUsize::new(0),
            }),
        }
    }

    async fn store(&self, model: &str) -> Arc<dyn ChunkStore> {
        let store = SqliteChunkStore::new(
            self.datastore.pool().clone(),
            space(model),
            RetryPolicy::none(),
        );
        store.ensure_space().await.unwrap();
        Arc::new(store)
    }

    async fn ingestor(&self, model: &str) -> Ingestor {
        let adapter = EmbeddingAdapter::new(self.provider.clone(), space(model), 8);
        Ingestor::new(
            &self.datastore,
            ChunkReconciler::new(self.store(model).await),
            adapter,
            &self.config,
        )
    }

    fn embedded(&self) -> usize {
        self.provider.embedded.load(Ordering::SeqCst)
    }
}

async fn stored_hashes(store: &Arc<dyn ChunkStore>, doc_id: &str) -> HashSet<String> {
    store.existing_hashes(doc_id).await.unwrap()
}

fn expected_hashes(doc_id: &str, text: &str, config: &ChunkConfig) -> HashSet<String> {
    chunk_document(doc_id, text, config)
        .into_iter()
        .map(|d| d.hash)
        .collect()
}

#[tokio::test]
async fn test_add_skip_then_update_single_url() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;
    let original = words(24, "w");
    assert_eq!(chunk_document(URL_A, &original, &harness.config.chunk).len(), 3);

    let source = ScriptedSource::new(&[(URL_A, original.as_str())]);

    let first = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.totals.documents_added, 1);
    assert_eq!(first.totals.chunks_added, 3);
    assert_eq!(harness.embedded(), 3);

    let store = harness.store("scripted").await;
    let before = store.chunks_for_document(URL_A).await.unwrap();

    let second = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.totals.documents_skipped, 1);
    assert_eq!(second.totals.chunks_added, 0);
    assert_eq!(harness.embedded(), 3);
    assert_eq!(store.chunks_for_document(URL_A).await.unwrap(), before);

    // Rewrite the tail so only the last chunk changes
    let edited = format!("{} {}", words(20, "w"), words(4, "x"));
    source.edit(URL_A, &edited);

    let third = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(third.status, RunStatus::Success);
    assert_eq!(third.totals.documents_updated, 1);
    assert_eq!(third.totals.documents_added, 0);
    assert_eq!(third.totals.chunks_updated, 1);
    assert_eq!(harness.embedded(), 4);

    assert_eq!(
        stored_hashes(&store, URL_A).await,
        expected_hashes(URL_A, &edited, &harness.config.chunk)
    );

    let state = harness
        .datastore
        .document_states()
        .get_document_state(URL_A)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.chunk_count, 3);
    assert_eq!(state.raw_id.as_deref(), Some(URL_A));
}

#[tokio::test]
async fn test_one_failing_document_does_not_block_siblings() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;

    let texts: Vec<(String, String)> = (0..5)
        .map(|i| (format!("https://example.com/{i}"), words(12, &format!("d{i}"))))
        .collect();
    let pages: Vec<(&str, &str)> = texts
        .iter()
        .map(|(id, text)| (id.as_str(), text.as_str()))
        .collect();
    let source = ScriptedSource::new(&pages).failing("https://example.com/2");

    let report = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.totals.error_count, 1);
    assert_eq!(report.totals.documents_added, 4);
    assert_eq!(report.totals.documents_processed, 5);
    assert_eq!(report.error_logs.len(), 1);
    assert_eq!(
        report.error_logs[0].doc_id.as_deref(),
        Some("https://example.com/2")
    );
    assert_eq!(report.error_logs[0].context, "web/fetch");

    let store = harness.store("scripted").await;
    for (id, _) in &texts {
        let has = store.has_chunks(id).await.unwrap();
        assert_eq!(has, id != "https://example.com/2", "unexpected chunks for {id}");
    }

    let run = harness
        .datastore
        .run_ledger()
        .get_run(report.run_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, "completed_with_errors");
    assert_eq!(run.totals.error_count, 1);
    assert_eq!(run.error_logs.len(), 1);
}

#[tokio::test]
async fn test_simulated_missing_state_table_forces_full() {
    let harness = Harness::new(
        true,
        DatastoreAvailability::default().with_document_state_missing(),
    )
    .await;
    let ingestor = harness.ingestor("scripted").await;
    let text = words(24, "w");
    let source = ScriptedSource::new(&[(URL_A, text.as_str())]);

    let first = ingestor.run(&source, IngestionType::Partial).await;
    let second = ingestor.run(&source, IngestionType::Partial).await;

    for report in [&first, &second] {
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.totals.documents_skipped, 0);
        assert_eq!(report.totals.documents_added, 1);
    }
    // Forced full, but stored chunks are reused rather than re-embedded
    assert_eq!(second.totals.chunks_added, 0);
    assert_eq!(harness.embedded(), 3);
    assert!(harness
        .datastore
        .document_states()
        .count_documents()
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_uninitialized_datastore_degrades_instead_of_failing() {
    let harness = Harness::new(false, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;
    let text = words(24, "w");
    let source = ScriptedSource::new(&[(URL_A, text.as_str())]);

    let report = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(report.status, RunStatus::Success);
    assert!(report.run_id.is_none());
    assert_eq!(report.totals.documents_added, 1);
    assert_eq!(report.totals.chunks_added, 3);

    let availability = harness.datastore.availability();
    assert!(!availability.document_state.is_available());
    assert!(!availability.ingest_runs.is_available());
}

#[tokio::test]
async fn test_metadata_only_change_skips_embedding() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;
    let text = words(24, "w");
    let source = ScriptedSource::new(&[(URL_A, text.as_str())]);
    source.set_metadata(URL_A, json!({ "tags": ["b", "a"], "domain": "example.com" }));

    ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(harness.embedded(), 3);

    // Same metadata in a different order is not a change
    source.set_metadata(URL_A, json!({ "domain": "example.com", "tags": ["a", "b", "a"] }));
    let unchanged = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(unchanged.totals.documents_skipped, 1);

    source.set_metadata(URL_A, json!({ "domain": "example.com", "tags": ["c"] }));
    let report = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(report.totals.documents_updated, 1);
    assert_eq!(report.totals.chunks_updated, 0);
    assert_eq!(harness.embedded(), 3);

    let state = harness
        .datastore
        .document_states()
        .get_document_state(URL_A)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.metadata.unwrap().tags(), vec!["c"]);
}

#[tokio::test]
async fn test_new_embedding_space_reembeds_unchanged_content() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let text = words(24, "w");
    let source = ScriptedSource::new(&[(URL_A, text.as_str())]);

    harness
        .ingestor("scripted")
        .await
        .run(&source, IngestionType::Partial)
        .await;

    let report = harness
        .ingestor("scripted-large")
        .await
        .run(&source, IngestionType::Partial)
        .await;
    assert_eq!(report.totals.documents_updated, 1);
    assert_eq!(report.totals.chunks_updated, 3);
    assert_eq!(harness.embedded(), 6);

    let other = harness.store("scripted-large").await;
    assert_eq!(stored_hashes(&other, URL_A).await.len(), 3);
}

#[tokio::test]
async fn test_full_ingestion_reprocesses_without_duplicates() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;
    let text = words(24, "w");
    let source = ScriptedSource::new(&[(URL_A, text.as_str())]);

    ingestor.run(&source, IngestionType::Partial).await;
    let report = ingestor.run(&source, IngestionType::Full).await;

    assert_eq!(report.totals.documents_skipped, 0);
    assert_eq!(report.totals.documents_updated, 1);
    assert_eq!(report.totals.chunks_updated, 3);
    assert_eq!(harness.embedded(), 6);

    let store = harness.store("scripted").await;
    assert_eq!(store.chunks_for_document(URL_A).await.unwrap().len(), 3);
    assert_eq!(
        stored_hashes(&store, URL_A).await,
        expected_hashes(URL_A, &text, &harness.config.chunk)
    );
}

#[tokio::test]
async fn test_title_change_reaches_kept_chunks() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;
    let original = words(24, "w");
    let source = ScriptedSource::new(&[(URL_A, original.as_str())]);
    source.set_title(URL_A, "Old Title");

    ingestor.run(&source, IngestionType::Partial).await;

    let edited = format!("{} {}", words(20, "w"), words(4, "x"));
    source.edit(URL_A, &edited);
    source.set_title(URL_A, "New Title");
    let report = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(report.totals.chunks_updated, 1);
    assert_eq!(harness.embedded(), 4);

    let store = harness.store("scripted").await;
    let titles: Vec<Option<String>> = store
        .chunks_for_document(URL_A)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.title)
        .collect();
    assert_eq!(titles, vec![Some("New Title".to_string()); 3]);
}

#[tokio::test]
async fn test_concurrency_caps_documents_in_flight() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await.with_concurrency(2);

    let texts: Vec<(String, String)> = (0..6)
        .map(|i| (format!("https://example.com/{i}"), words(12, &format!("d{i}"))))
        .collect();
    let pages: Vec<(&str, &str)> = texts
        .iter()
        .map(|(id, text)| (id.as_str(), text.as_str()))
        .collect();
    let source = ScriptedSource::new(&pages).slow(Duration::from_millis(30));

    let report = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.totals.documents_added, 6);
    assert_eq!(source.peak_in_flight(), 2);
}

#[tokio::test]
async fn test_empty_document_is_skipped_not_failed() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;
    let source = ScriptedSource::new(&[(URL_A, "  \n\t ")]);

    let report = ingestor.run(&source, IngestionType::Partial).await;
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.totals.documents_skipped, 1);
    assert_eq!(report.totals.error_count, 0);
    assert_eq!(harness.embedded(), 0);
}

#[tokio::test]
async fn test_listing_failure_closes_run_as_failed() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let ingestor = harness.ingestor("scripted").await;

    let report = ingestor.run(&FailingListSource, IngestionType::Partial).await;
    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.failure.as_deref().unwrap().contains("workspace root"));

    let run = harness
        .datastore
        .run_ledger()
        .get_run(report.run_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, "failed");
    assert_eq!(run.source, "notion-page");
    assert!(run.error_logs.iter().any(|e| e.context == "run"));
}

#[tokio::test]
async fn test_event_stream_brackets_the_run() {
    let harness = Harness::new(true, DatastoreAvailability::default()).await;
    let (sink, mut rx) = EventSink::channel();
    let ingestor = harness.ingestor("scripted").await.with_events(sink);
    let text = words(24, "w");
    let source = ScriptedSource::new(&[(URL_A, text.as_str())]);

    let report = ingestor.run(&source, IngestionType::Partial).await;
    drop(ingestor);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(
        events.first(),
        Some(IngestEvent::RunStarted { run_id }) if *run_id == report.run_id
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, IngestEvent::Queue { current: 1, total: 1, item_id } if item_id == URL_A)));
    match events.last() {
        Some(IngestEvent::Complete { status, stats, .. }) => {
            assert_eq!(*status, RunStatus::Success);
            assert_eq!(stats.chunks_added, 3);
        }
        other => panic!("expected Complete, got {other:?}"),
    }
}
