//! Local datastore using SQLite
//!
//! This module owns the connection pool and the schema:
//! - Document state (hash/metadata per canonical id)
//! - Ingest runs (the run ledger)
//! - Chunk tables (one per embedding space, created on demand)
//!
//! Opening the datastore never creates tables. `docsync init` applies the
//! schema; until then the stores degrade through their [`TableGate`]s.

mod availability;
mod retry;
mod schema;

pub use availability::*;
pub use retry::*;
pub use schema::*;

use crate::config::Config;
use crate::error::Result;
use crate::runs::RunLedger;
use crate::state::DocumentStateStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Datastore handle: pool, availability gates and retry policy
#[derive(Clone)]
pub struct Datastore {
    pool: SqlitePool,
    availability: DatastoreAvailability,
    retry: RetryPolicy,
}

impl Datastore {
    /// Connect to the datastore configured for this process
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut store = Self::open(&config.paths.db_file).await?;
        store.retry = RetryPolicy::from(&config.ingest);
        Ok(store)
    }

    /// Open a datastore file directly (without full config)
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            availability: DatastoreAvailability::all_available(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the availability gates, e.g. to simulate a missing table
    pub fn with_availability(mut self, availability: DatastoreAvailability) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply the schema. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check whether a table exists
    pub async fn has_table(&self, table: &str) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Check if the schema has been applied
    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.has_table(DOCUMENT_STATE_TABLE).await?
            && self.has_table(INGEST_RUNS_TABLE).await?)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn availability(&self) -> &DatastoreAvailability {
        &self.availability
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Document state store sharing this pool
    pub fn document_states(&self) -> DocumentStateStore {
        DocumentStateStore::new(
            self.pool.clone(),
            self.availability.document_state.clone(),
            self.retry,
        )
    }

    /// Run ledger sharing this pool
    pub fn run_ledger(&self) -> RunLedger {
        RunLedger::new(
            self.pool.clone(),
            self.availability.ingest_runs.clone(),
            self.retry,
        )
    }
}
