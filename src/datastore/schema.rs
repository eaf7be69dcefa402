//! SQLite schema definition

/// Table holding per-document sync state
pub const DOCUMENT_STATE_TABLE: &str = "document_state";

/// Table holding the run ledger
pub const INGEST_RUNS_TABLE: &str = "ingest_runs";

/// SQL schema for document state and the run ledger.
///
/// Chunk tables are per embedding space and created on demand, see
/// [`chunk_table_sql`].
pub const SCHEMA_SQL: &str = r#"
-- Document state: last known hash/metadata per canonical document id
CREATE TABLE IF NOT EXISTS document_state (
    doc_id TEXT PRIMARY KEY,
    raw_id TEXT,
    source_url TEXT,
    content_hash TEXT,
    last_ingested_at TEXT,
    last_source_update TEXT,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    total_characters INTEGER NOT NULL DEFAULT 0,
    metadata_json TEXT
);

-- Ingest runs: one row per triggered ingestion
CREATE TABLE IF NOT EXISTS ingest_runs (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    ingestion_type TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    duration_ms INTEGER,
    documents_processed INTEGER NOT NULL DEFAULT 0,
    documents_added INTEGER NOT NULL DEFAULT 0,
    documents_updated INTEGER NOT NULL DEFAULT 0,
    documents_skipped INTEGER NOT NULL DEFAULT 0,
    chunks_added INTEGER NOT NULL DEFAULT 0,
    chunks_updated INTEGER NOT NULL DEFAULT 0,
    characters_added INTEGER NOT NULL DEFAULT 0,
    characters_updated INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    error_logs_json TEXT,
    metadata_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_ingest_runs_started ON ingest_runs(started_at);
CREATE INDEX IF NOT EXISTS idx_document_state_url ON document_state(source_url);
"#;

/// DDL for the chunk table of one embedding space
pub fn chunk_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    doc_id TEXT NOT NULL,
    chunk_hash TEXT NOT NULL,
    source_url TEXT,
    title TEXT,
    chunk_text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    ingested_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, chunk_hash)
);
"#
    )
}
