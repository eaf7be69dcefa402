//! Ingestion orchestrator
//!
//! One [`Ingestor::run`] call is one ledger run over one source. Candidates
//! are processed with bounded concurrency; each document goes through
//! fetch, hash, decide, chunk, embed, reconcile and persist in order.
//! A failing document is logged into the run and never stops its siblings,
//! and the run record is closed whatever happens.

mod events;

pub use events::*;

use crate::chunk::chunk_document;
use crate::config::{ChunkConfig, Config};
use crate::datastore::Datastore;
use crate::decision::{
    decide_ingest_action, is_unchanged, normalize_timestamp, IngestAction, IngestDecision,
    IngestionType,
};
use crate::embed::{EmbeddingAdapter, EmbeddingSelector};
use crate::error::{Error, Result};
use crate::hashing::{compute_content_hash, metadata_equals, normalize_plain_text};
use crate::reconcile::{ChunkContext, ChunkReconciler};
use crate::runs::{
    ErrorLogEntry, RunLedger, RunOutcome, RunStatus, RunTotals, MAX_ERROR_LOGS,
};
use crate::source::{DocumentIdentity, DocumentSource};
use crate::state::{DocumentStateStore, DocumentStateUpdate};
use crate::store::open_chunk_store;
use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Why a document was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unchanged,
    EmptyText,
    NoChunks,
}

/// What happened to one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Skipped { reason: SkipReason },
    MetadataUpdated,
    /// First ingest; `chunks` is the number of chunks embedded
    Added { chunks: usize, characters: usize },
    /// Re-ingest of a known document; `chunks` counts newly embedded chunks
    Updated { chunks: usize, characters: usize },
}

/// A per-document failure and the pipeline step it happened in
#[derive(Debug)]
pub struct DocumentFailure {
    pub step: &'static str,
    pub error: Error,
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.error)
    }
}

/// Step blamed for a failed reconciliation
fn reconcile_step(error: &Error) -> &'static str {
    match error {
        Error::Embedding(_) => "embed",
        Error::Config(_) => "embedding space",
        _ => "reconcile",
    }
}

trait AtStep<T> {
    fn at(self, step: &'static str) -> std::result::Result<T, DocumentFailure>;
}

impl<T> AtStep<T> for Result<T> {
    fn at(self, step: &'static str) -> std::result::Result<T, DocumentFailure> {
        self.map_err(|error| DocumentFailure { step, error })
    }
}

/// Result of a run as handed back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `None` when the run ledger is unavailable
    pub run_id: Option<String>,
    pub source: String,
    pub ingestion_type: IngestionType,
    pub status: RunStatus,
    pub totals: RunTotals,
    pub error_logs: Vec<ErrorLogEntry>,
    pub duration_ms: u64,
    /// Run-fatal failure message
    pub failure: Option<String>,
}

impl RunReport {
    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let t = &self.totals;
        let mut line = format!(
            "{} ({}): processed {}, added {}, updated {}, skipped {}, errored {}; {} chunks added, {} chunks updated in {:.1}s",
            self.status,
            self.source,
            t.documents_processed,
            t.documents_added,
            t.documents_updated,
            t.documents_skipped,
            t.error_count,
            t.chunks_added,
            t.chunks_updated,
            self.duration_ms as f64 / 1000.0
        );
        if let Some(failure) = &self.failure {
            line.push_str(&format!(" [{}]", failure));
        }
        line
    }
}

#[derive(Debug, Default)]
struct RunAccumulator {
    totals: RunTotals,
    error_logs: Vec<ErrorLogEntry>,
}

impl RunAccumulator {
    fn record(
        &mut self,
        context: &str,
        doc_id: &str,
        result: &std::result::Result<DocumentOutcome, DocumentFailure>,
    ) {
        let totals = &mut self.totals;
        totals.documents_processed += 1;

        match result {
            Ok(DocumentOutcome::Skipped { .. }) => totals.documents_skipped += 1,
            Ok(DocumentOutcome::MetadataUpdated) => totals.documents_updated += 1,
            Ok(DocumentOutcome::Added { chunks, characters }) => {
                totals.documents_added += 1;
                totals.chunks_added += *chunks as u64;
                totals.characters_added += *characters as u64;
            }
            Ok(DocumentOutcome::Updated { chunks, characters }) => {
                totals.documents_updated += 1;
                totals.chunks_updated += *chunks as u64;
                totals.characters_updated += *characters as u64;
            }
            Err(failure) => {
                totals.error_count += 1;
                if self.error_logs.len() < MAX_ERROR_LOGS {
                    self.error_logs.push(ErrorLogEntry::new(
                        format!("{}/{}", context, failure.step),
                        Some(doc_id),
                        failure.error.to_string(),
                    ));
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Drives sources through the change decision, chunking, embedding and
/// reconciliation pipeline
pub struct Ingestor {
    states: DocumentStateStore,
    ledger: RunLedger,
    reconciler: ChunkReconciler,
    adapter: EmbeddingAdapter,
    chunk_config: ChunkConfig,
    concurrency: usize,
    events: EventSink,
}

impl Ingestor {
    pub fn new(
        datastore: &Datastore,
        reconciler: ChunkReconciler,
        adapter: EmbeddingAdapter,
        config: &Config,
    ) -> Self {
        Self {
            states: datastore.document_states(),
            ledger: datastore.run_ledger(),
            reconciler,
            adapter,
            chunk_config: config.chunk.clone(),
            concurrency: config.ingest.concurrency.max(1),
            events: EventSink::disabled(),
        }
    }

    /// Resolve the embedding space, bind its provider and open its chunk store
    pub async fn from_config(
        config: &Config,
        datastore: &Datastore,
        selector: &EmbeddingSelector,
    ) -> Result<Self> {
        let adapter = EmbeddingAdapter::from_config(&config.embedding, selector)?;
        let store = open_chunk_store(config, datastore, adapter.space()).await?;
        Ok(Self::new(
            datastore,
            ChunkReconciler::new(store),
            adapter,
            config,
        ))
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn adapter(&self) -> &EmbeddingAdapter {
        &self.adapter
    }

    /// Run one ingestion over `source`. Always returns a report with a
    /// terminal status; run-fatal errors end up in `failure`.
    pub async fn run(&self, source: &dyn DocumentSource, ingestion_type: IngestionType) -> RunReport {
        let started = Instant::now();
        let label = source.label().to_string();
        let space = self.adapter.space();

        let run_metadata = json!({
            "embeddingSpace": space.id(),
            "dimension": space.dimension,
            "concurrency": self.concurrency,
        });

        let handle = match self
            .ledger
            .start_ingest_run(&label, ingestion_type, Some(&run_metadata))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not open run record for {}: {}", label, e);
                let message = format!("Could not open run record: {}", e);
                self.events.log(LogLevel::Error, &message);
                let report = RunReport {
                    run_id: None,
                    source: label,
                    ingestion_type,
                    status: RunStatus::Failed,
                    totals: RunTotals::default(),
                    error_logs: vec![ErrorLogEntry::new("run", None, message.clone())],
                    duration_ms: started.elapsed().as_millis() as u64,
                    failure: Some(message),
                };
                self.complete(&report);
                return report;
            }
        };
        let run_id = handle.as_ref().map(|h| h.id.clone());
        if run_id.is_none() {
            info!("Run ledger unavailable, ingesting without a run record");
        }
        self.events.send(IngestEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let accumulator = Mutex::new(RunAccumulator::default());
        let driven = AssertUnwindSafe(self.drive(source, &label, ingestion_type, &accumulator))
            .catch_unwind()
            .await;
        let failure = match driven {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload))),
        };
        if let Some(failure) = &failure {
            warn!("Run over {} failed: {}", label, failure);
            self.events.log(LogLevel::Error, failure.clone());
        }

        let RunAccumulator { totals, error_logs } = accumulator.into_inner();
        let outcome = RunOutcome {
            failure,
            duration_ms: started.elapsed().as_millis() as u64,
            totals,
            error_logs,
        };

        let status = match self.ledger.finish_ingest_run(handle.as_ref(), &outcome).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Could not close run record: {}", e);
                outcome.status()
            }
        };

        let report = RunReport {
            run_id,
            source: label,
            ingestion_type,
            status,
            totals: outcome.totals,
            error_logs: outcome.error_logs,
            duration_ms: outcome.duration_ms,
            failure: outcome.failure,
        };
        info!("{}", report.summary());
        self.complete(&report);
        report
    }

    fn complete(&self, report: &RunReport) {
        self.events.progress("complete", 100);
        self.events.send(IngestEvent::Complete {
            status: report.status,
            stats: report.totals.clone(),
            run_id: report.run_id.clone(),
        });
    }

    async fn drive(
        &self,
        source: &dyn DocumentSource,
        label: &str,
        ingestion_type: IngestionType,
        accumulator: &Mutex<RunAccumulator>,
    ) -> Result<()> {
        self.events.progress("listing", 0);
        let candidates = source.list_candidates().await?;
        let total = candidates.len();
        info!("Ingesting {} documents from {} ({})", total, label, ingestion_type);

        let done = AtomicUsize::new(0);
        let done = &done;

        stream::iter(candidates.iter().enumerate())
            .map(|(index, identity)| async move {
                self.events.queue(index + 1, total, &identity.canonical_id);

                let result = AssertUnwindSafe(self.ingest_document(source, identity, ingestion_type))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(DocumentFailure {
                            step: "pipeline",
                            error: Error::Other(format!("panicked: {}", panic_message(payload))),
                        })
                    });

                match &result {
                    Ok(outcome) => debug!(doc_id = %identity.canonical_id, ?outcome, "Document done"),
                    Err(failure) => {
                        warn!("Failed to ingest {}: {}", identity.canonical_id, failure);
                        self.events.log(
                            LogLevel::Error,
                            format!("{}: {}", identity.canonical_id, failure),
                        );
                    }
                }

                accumulator
                    .lock()
                    .await
                    .record(label, &identity.canonical_id, &result);

                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                self.events
                    .progress("ingesting", (finished * 100 / total.max(1)) as u8);
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<()>>()
            .await;

        Ok(())
    }

    async fn persist_state(
        &self,
        update: &DocumentStateUpdate,
    ) -> std::result::Result<(), DocumentFailure> {
        let drift = self
            .states
            .upsert_document_state(update)
            .await
            .at("state")?;
        if let Some(drift) = drift {
            self.events.log(
                LogLevel::Warn,
                format!(
                    "{}: raw id changed from {} to {}",
                    drift.doc_id, drift.stored_raw_id, drift.incoming_raw_id
                ),
            );
        }
        Ok(())
    }

    /// Run the per-document pipeline for one candidate
    pub async fn ingest_document(
        &self,
        source: &dyn DocumentSource,
        identity: &DocumentIdentity,
        ingestion_type: IngestionType,
    ) -> std::result::Result<DocumentOutcome, DocumentFailure> {
        let doc_id = identity.canonical_id.as_str();
        let document = source.fetch(identity).await.at("fetch")?;

        let normalized = normalize_plain_text(&document.plain_text);
        if normalized.is_empty() {
            info!(doc_id, "No readable text, skipping");
            self.events
                .log(LogLevel::Info, format!("{}: no readable text", doc_id));
            return Ok(DocumentOutcome::Skipped {
                reason: SkipReason::EmptyText,
            });
        }

        let content_hash = compute_content_hash(doc_id, &normalized);
        let existing = self.states.get_document_state(doc_id).await.at("state")?;

        // An operator-requested full run re-embeds; a derived one reuses vectors
        let reembed = ingestion_type == IngestionType::Full;

        // Without document state nothing can be proven unchanged
        let ingestion_type = if self.states.is_available() {
            ingestion_type
        } else {
            IngestionType::Full
        };

        let content_unchanged = is_unchanged(
            existing.as_ref(),
            &content_hash,
            document.last_modified.as_deref(),
        );
        let metadata_unchanged = metadata_equals(
            existing
                .as_ref()
                .and_then(|s| s.metadata.as_ref())
                .map(|m| m.as_map()),
            document.metadata.as_ref().map(|m| m.as_map()),
        );
        let provider_has_chunks = if content_unchanged {
            self.reconciler
                .store()
                .has_chunks(doc_id)
                .await
                .at("chunk lookup")?
        } else {
            false
        };

        let action = decide_ingest_action(IngestDecision {
            content_unchanged,
            metadata_unchanged,
            ingestion_type,
            provider_has_chunks,
        });
        debug!(
            doc_id,
            %action,
            content_unchanged,
            metadata_unchanged,
            provider_has_chunks,
            "Ingest decision"
        );

        let now = Utc::now().to_rfc3339();
        let last_source_update = document
            .last_modified
            .as_deref()
            .and_then(normalize_timestamp);
        let source_url = document
            .identity
            .source_url
            .clone()
            .or_else(|| identity.source_url.clone());

        match action {
            IngestAction::Skip => Ok(DocumentOutcome::Skipped {
                reason: SkipReason::Unchanged,
            }),
            IngestAction::MetadataOnly => {
                let update = DocumentStateUpdate {
                    raw_id: Some(document.identity.raw_id.clone()),
                    source_url,
                    last_ingested_at: Some(now),
                    last_source_update,
                    metadata: document.metadata.clone(),
                    ..DocumentStateUpdate::new(doc_id)
                };
                self.persist_state(&update).await?;
                Ok(DocumentOutcome::MetadataUpdated)
            }
            IngestAction::Full => {
                let drafts = chunk_document(doc_id, &normalized, &self.chunk_config);
                if drafts.is_empty() {
                    info!(doc_id, "Chunker produced no chunks, skipping");
                    return Ok(DocumentOutcome::Skipped {
                        reason: SkipReason::NoChunks,
                    });
                }

                let context = ChunkContext {
                    doc_id: doc_id.to_string(),
                    title: document.title.clone(),
                    source_url: source_url.clone(),
                };
                let reconciled = if reembed {
                    self.reconciler
                        .rebuild_chunks(&context, &drafts, &self.adapter)
                        .await
                } else {
                    self.reconciler
                        .sync_chunks(&context, &drafts, &self.adapter)
                        .await
                }
                .map_err(|error| DocumentFailure {
                    step: reconcile_step(&error),
                    error,
                })?;

                let characters = normalized.chars().count();
                let update = DocumentStateUpdate {
                    raw_id: Some(document.identity.raw_id.clone()),
                    source_url,
                    content_hash: Some(content_hash),
                    last_ingested_at: Some(now),
                    last_source_update,
                    chunk_count: Some(drafts.len() as i64),
                    total_characters: Some(characters as i64),
                    metadata: document.metadata.clone(),
                    ..DocumentStateUpdate::new(doc_id)
                };
                self.persist_state(&update).await?;

                if existing.is_some() {
                    Ok(DocumentOutcome::Updated {
                        chunks: reconciled.embedded,
                        characters,
                    })
                } else {
                    Ok(DocumentOutcome::Added {
                        chunks: reconciled.embedded,
                        characters,
                    })
                }
            }
        }
    }
}
