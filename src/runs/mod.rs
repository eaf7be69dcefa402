//! Run ledger
//!
//! Every triggered ingestion opens one `ingest_runs` row as `in_progress`
//! and closes it exactly once. The terminal status is derived here from the
//! run outcome; callers never pick it themselves.

use crate::datastore::{RetryPolicy, TableGate};
use crate::decision::IngestionType;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum error log entries stored per run
pub const MAX_ERROR_LOGS: usize = 50;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Success,
    CompletedWithErrors,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::InProgress => write!(f, "in_progress"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(RunStatus::InProgress),
            "success" => Ok(RunStatus::Success),
            "completed_with_errors" => Ok(RunStatus::CompletedWithErrors),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Other(format!("Unknown run status: {}", s))),
        }
    }
}

/// Terminal status of a run
pub fn derive_run_status(run_failed: bool, error_count: u64) -> RunStatus {
    if run_failed {
        RunStatus::Failed
    } else if error_count > 0 {
        RunStatus::CompletedWithErrors
    } else {
        RunStatus::Success
    }
}

/// Aggregate counters of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub documents_processed: u64,
    pub documents_added: u64,
    pub documents_updated: u64,
    pub documents_skipped: u64,
    pub chunks_added: u64,
    pub chunks_updated: u64,
    pub characters_added: u64,
    pub characters_updated: u64,
    pub error_count: u64,
}

/// One failed document (or run-level failure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub context: String,
    pub doc_id: Option<String>,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn new(context: impl Into<String>, doc_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            doc_id: doc_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Handle of an open run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub id: String,
    pub source: String,
    pub started_at: String,
}

/// Everything needed to close a run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Run-fatal failure message, if the run itself failed
    pub failure: Option<String>,
    pub duration_ms: u64,
    pub totals: RunTotals,
    pub error_logs: Vec<ErrorLogEntry>,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        derive_run_status(self.failure.is_some(), self.totals.error_count)
    }
}

/// A stored run, as listed by `recent_runs`
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub source: String,
    pub ingestion_type: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub totals: RunTotals,
    pub error_logs: Vec<ErrorLogEntry>,
    pub metadata: Option<Value>,
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    source: String,
    ingestion_type: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
    duration_ms: Option<i64>,
    documents_processed: i64,
    documents_added: i64,
    documents_updated: i64,
    documents_skipped: i64,
    chunks_added: i64,
    chunks_updated: i64,
    characters_added: i64,
    characters_updated: i64,
    error_count: i64,
    error_logs_json: Option<String>,
    metadata_json: Option<String>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        let count = |v: i64| v.max(0) as u64;
        Self {
            id: row.id,
            source: row.source,
            ingestion_type: row.ingestion_type,
            status: row.status,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_ms: row.duration_ms,
            totals: RunTotals {
                documents_processed: count(row.documents_processed),
                documents_added: count(row.documents_added),
                documents_updated: count(row.documents_updated),
                documents_skipped: count(row.documents_skipped),
                chunks_added: count(row.chunks_added),
                chunks_updated: count(row.chunks_updated),
                characters_added: count(row.characters_added),
                characters_updated: count(row.characters_updated),
                error_count: count(row.error_count),
            },
            error_logs: row
                .error_logs_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok())
                .unwrap_or_default(),
            metadata: row
                .metadata_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok()),
        }
    }
}

/// Run ledger with missing-table degradation
#[derive(Clone)]
pub struct RunLedger {
    pool: SqlitePool,
    gate: Arc<TableGate>,
    retry: RetryPolicy,
}

impl RunLedger {
    pub fn new(pool: SqlitePool, gate: Arc<TableGate>, retry: RetryPolicy) -> Self {
        Self { pool, gate, retry }
    }

    pub fn is_available(&self) -> bool {
        self.gate.is_available()
    }

    fn degrade<T>(&self, result: Result<T>, fallback: T) -> Result<T> {
        match result {
            Err(Error::MissingRelation(detail)) => {
                self.gate.mark_missing(&detail);
                Ok(fallback)
            }
            other => other,
        }
    }

    /// Open a run. Returns `None` when the ledger table is missing.
    pub async fn start_ingest_run(
        &self,
        source: &str,
        ingestion_type: IngestionType,
        metadata: Option<&Value>,
    ) -> Result<Option<RunHandle>> {
        if !self.gate.is_available() {
            return Ok(None);
        }

        let handle = RunHandle {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            started_at: Utc::now().to_rfc3339(),
        };
        let metadata_json = metadata.map(Value::to_string);

        let pool = &self.pool;
        let run = &handle;
        let ingestion_type = ingestion_type.to_string();
        let ingestion_type = ingestion_type.as_str();
        let metadata_json = metadata_json.as_deref();

        let result = self
            .retry
            .run("start_ingest_run", move || async move {
                sqlx::query(
                    r#"
                    INSERT INTO ingest_runs (id, source, ingestion_type, status, started_at, metadata_json)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&run.id)
                .bind(&run.source)
                .bind(ingestion_type)
                .bind(RunStatus::InProgress.to_string())
                .bind(&run.started_at)
                .bind(metadata_json)
                .execute(pool)
                .await
                .map(|_| true)
                .map_err(Error::from)
            })
            .await;

        if self.degrade(result, false)? {
            info!(run_id = %handle.id, source, "Started ingest run");
            Ok(Some(handle))
        } else {
            Ok(None)
        }
    }

    /// Close a run with its derived terminal status.
    ///
    /// No-op for a `None` handle. Error logs beyond [`MAX_ERROR_LOGS`] are
    /// dropped; the error count still reflects all of them.
    pub async fn finish_ingest_run(
        &self,
        handle: Option<&RunHandle>,
        outcome: &RunOutcome,
    ) -> Result<RunStatus> {
        let status = outcome.status();
        let Some(handle) = handle else {
            return Ok(status);
        };
        if !self.gate.is_available() {
            return Ok(status);
        }

        let mut error_logs: Vec<&ErrorLogEntry> =
            outcome.error_logs.iter().take(MAX_ERROR_LOGS).collect();
        if let Some(failure) = &outcome.failure {
            if error_logs.len() == MAX_ERROR_LOGS {
                error_logs.pop();
            }
            debug!(run_id = %handle.id, failure = %failure, "Recording run failure");
        }
        let run_failure = outcome
            .failure
            .as_ref()
            .map(|message| ErrorLogEntry::new("run", None, message.clone()));
        error_logs.extend(run_failure.as_ref());
        let error_logs_json = serde_json::to_string(&error_logs)?;

        let pool = &self.pool;
        let totals = &outcome.totals;
        let run_id = handle.id.as_str();
        let status_text = status.to_string();
        let status_text = status_text.as_str();
        let ended_at = Utc::now().to_rfc3339();
        let ended_at = ended_at.as_str();
        let error_logs_json = error_logs_json.as_str();
        let duration_ms = outcome.duration_ms as i64;

        let result = self
            .retry
            .run("finish_ingest_run", move || async move {
                sqlx::query(
                    r#"
                    UPDATE ingest_runs SET
                        status = ?,
                        ended_at = ?,
                        duration_ms = ?,
                        documents_processed = ?,
                        documents_added = ?,
                        documents_updated = ?,
                        documents_skipped = ?,
                        chunks_added = ?,
                        chunks_updated = ?,
                        characters_added = ?,
                        characters_updated = ?,
                        error_count = ?,
                        error_logs_json = ?
                    WHERE id = ? AND status = 'in_progress'
                    "#,
                )
                .bind(status_text)
                .bind(ended_at)
                .bind(duration_ms)
                .bind(totals.documents_processed as i64)
                .bind(totals.documents_added as i64)
                .bind(totals.documents_updated as i64)
                .bind(totals.documents_skipped as i64)
                .bind(totals.chunks_added as i64)
                .bind(totals.chunks_updated as i64)
                .bind(totals.characters_added as i64)
                .bind(totals.characters_updated as i64)
                .bind(totals.error_count as i64)
                .bind(error_logs_json)
                .bind(run_id)
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(Error::from)
            })
            .await;

        self.degrade(result, ())?;
        info!(run_id, %status, duration_ms, "Finished ingest run");
        Ok(status)
    }

    /// Get a run by id
    pub async fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        if !self.gate.is_available() {
            return Ok(None);
        }

        let result = sqlx::query_as::<_, RunRow>("SELECT * FROM ingest_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from);
        Ok(self.degrade(result, None)?.map(RunRecord::from))
    }

    /// Most recent runs first. Empty when the ledger is missing.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        if !self.gate.is_available() {
            return Ok(Vec::new());
        }

        let result = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM ingest_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from);
        Ok(self
            .degrade(result, Vec::new())?
            .into_iter()
            .map(RunRecord::from)
            .collect())
    }
}
