//! Document state store
//!
//! One row per canonical document id, holding the last known content hash,
//! metadata and bookkeeping counters. Rows are created on first successful
//! ingest and updated on every later one; this module never deletes them.

use crate::datastore::{RetryPolicy, TableGate};
use crate::error::{Error, Result};
use crate::hashing::NormalizedMetadata;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::sync::Arc;
use tracing::{debug, warn};

/// Last known state of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub doc_id: String,
    /// Last seen raw source identifier; only used for drift detection
    pub raw_id: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
    pub last_ingested_at: Option<String>,
    pub last_source_update: Option<String>,
    pub chunk_count: i64,
    pub total_characters: i64,
    pub metadata: Option<NormalizedMetadata>,
}

#[derive(Debug, FromRow)]
struct DocumentStateRow {
    doc_id: String,
    raw_id: Option<String>,
    source_url: Option<String>,
    content_hash: Option<String>,
    last_ingested_at: Option<String>,
    last_source_update: Option<String>,
    chunk_count: i64,
    total_characters: i64,
    metadata_json: Option<String>,
}

impl From<DocumentStateRow> for DocumentState {
    fn from(row: DocumentStateRow) -> Self {
        Self {
            doc_id: row.doc_id,
            raw_id: row.raw_id,
            source_url: row.source_url,
            content_hash: row.content_hash,
            last_ingested_at: row.last_ingested_at,
            last_source_update: row.last_source_update,
            chunk_count: row.chunk_count,
            total_characters: row.total_characters,
            metadata: row
                .metadata_json
                .as_deref()
                .and_then(NormalizedMetadata::from_json_str),
        }
    }
}

/// Partial update of a document's state.
///
/// `None` fields keep their stored value, except `metadata`, which is always
/// written as supplied so that removed metadata is persisted as removed.
#[derive(Debug, Clone, Default)]
pub struct DocumentStateUpdate {
    pub doc_id: String,
    pub raw_id: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
    pub last_ingested_at: Option<String>,
    pub last_source_update: Option<String>,
    pub chunk_count: Option<i64>,
    pub total_characters: Option<i64>,
    pub metadata: Option<NormalizedMetadata>,
}

impl DocumentStateUpdate {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            ..Self::default()
        }
    }
}

/// A raw id that no longer matches the one recorded for the same document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdDrift {
    pub doc_id: String,
    pub stored_raw_id: String,
    pub incoming_raw_id: String,
}

/// Compare the stored and incoming raw ids of one canonical document
pub fn detect_id_drift(
    doc_id: &str,
    stored_raw_id: Option<&str>,
    incoming_raw_id: Option<&str>,
) -> Option<IdDrift> {
    match (stored_raw_id, incoming_raw_id) {
        (Some(stored), Some(incoming)) if stored != incoming => Some(IdDrift {
            doc_id: doc_id.to_string(),
            stored_raw_id: stored.to_string(),
            incoming_raw_id: incoming.to_string(),
        }),
        _ => None,
    }
}

/// Document state persistence with missing-table degradation
#[derive(Clone)]
pub struct DocumentStateStore {
    pool: SqlitePool,
    gate: Arc<TableGate>,
    retry: RetryPolicy,
}

impl DocumentStateStore {
    pub fn new(pool: SqlitePool, gate: Arc<TableGate>, retry: RetryPolicy) -> Self {
        Self { pool, gate, retry }
    }

    /// False once the backing table was found missing
    pub fn is_available(&self) -> bool {
        self.gate.is_available()
    }

    /// Swallow missing-relation errors into `fallback`, flipping the gate
    fn degrade<T>(&self, result: Result<T>, fallback: T) -> Result<T> {
        match result {
            Err(Error::MissingRelation(detail)) => {
                self.gate.mark_missing(&detail);
                Ok(fallback)
            }
            other => other,
        }
    }

    /// Look up a document's state. `None` when unknown or degraded.
    pub async fn get_document_state(&self, doc_id: &str) -> Result<Option<DocumentState>> {
        if !self.gate.is_available() {
            return Ok(None);
        }

        let pool = &self.pool;
        let result = self
            .retry
            .run("get_document_state", move || async move {
                sqlx::query_as::<_, DocumentStateRow>(
                    "SELECT * FROM document_state WHERE doc_id = ?",
                )
                .bind(doc_id)
                .fetch_optional(pool)
                .await
                .map_err(Error::from)
            })
            .await;

        Ok(self.degrade(result, None)?.map(DocumentState::from))
    }

    /// Insert or partially update a document's state.
    ///
    /// A raw id that differs from the recorded one is logged as drift,
    /// returned, and the write still goes through.
    pub async fn upsert_document_state(
        &self,
        update: &DocumentStateUpdate,
    ) -> Result<Option<IdDrift>> {
        if !self.gate.is_available() {
            return Ok(None);
        }

        let pool = &self.pool;
        let doc_id = update.doc_id.as_str();

        let stored_raw = self
            .retry
            .run("read_raw_id", move || async move {
                sqlx::query_scalar::<_, Option<String>>(
                    "SELECT raw_id FROM document_state WHERE doc_id = ?",
                )
                .bind(doc_id)
                .fetch_optional(pool)
                .await
                .map_err(Error::from)
            })
            .await;
        let stored_raw = self.degrade(stored_raw, None)?.flatten();
        if !self.gate.is_available() {
            return Ok(None);
        }

        let drift = detect_id_drift(doc_id, stored_raw.as_deref(), update.raw_id.as_deref());
        if let Some(drift) = &drift {
            warn!(
                doc_id = %drift.doc_id,
                stored_raw_id = %drift.stored_raw_id,
                incoming_raw_id = %drift.incoming_raw_id,
                "Raw document id changed for canonical id; check upstream identity resolution"
            );
        }

        let metadata_json = update.metadata.as_ref().map(|m| m.to_stable_string());
        let metadata_json = metadata_json.as_deref();

        let result = self
            .retry
            .run("upsert_document_state", move || async move {
                sqlx::query(
                    r#"
                    INSERT INTO document_state (
                        doc_id, raw_id, source_url, content_hash, last_ingested_at,
                        last_source_update, chunk_count, total_characters, metadata_json
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, 0), COALESCE(?8, 0), ?9)
                    ON CONFLICT(doc_id) DO UPDATE SET
                        raw_id = COALESCE(?2, document_state.raw_id),
                        source_url = COALESCE(?3, document_state.source_url),
                        content_hash = COALESCE(?4, document_state.content_hash),
                        last_ingested_at = COALESCE(?5, document_state.last_ingested_at),
                        last_source_update = COALESCE(?6, document_state.last_source_update),
                        chunk_count = COALESCE(?7, document_state.chunk_count),
                        total_characters = COALESCE(?8, document_state.total_characters),
                        metadata_json = ?9
                    "#,
                )
                .bind(doc_id)
                .bind(update.raw_id.as_deref())
                .bind(update.source_url.as_deref())
                .bind(update.content_hash.as_deref())
                .bind(update.last_ingested_at.as_deref())
                .bind(update.last_source_update.as_deref())
                .bind(update.chunk_count)
                .bind(update.total_characters)
                .bind(metadata_json)
                .execute(pool)
                .await
                .map_err(Error::from)
            })
            .await;

        self.degrade(result.map(|_| ()), ())?;
        debug!(doc_id, "Persisted document state");
        Ok(drift)
    }

    /// Number of tracked documents, `None` when degraded
    pub async fn count_documents(&self) -> Result<Option<i64>> {
        if !self.gate.is_available() {
            return Ok(None);
        }

        let result = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM document_state")
            .fetch_one(&self.pool)
            .await
            .map(Some)
            .map_err(Error::from);
        self.degrade(result, None)
    }
}
