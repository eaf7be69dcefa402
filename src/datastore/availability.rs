//! Per-table availability gates
//!
//! A gate starts available. The first "relation does not exist" error flips
//! it into degraded mode for the rest of the process and logs one warning;
//! stores consult the gate before every call and turn into no-ops once it is
//! flipped. Gates are plain values handed to store constructors, so tests can
//! start from a degraded gate without touching shared state.

use crate::datastore::schema::{DOCUMENT_STATE_TABLE, INGEST_RUNS_TABLE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Availability of a single backing table
#[derive(Debug)]
pub struct TableGate {
    table: &'static str,
    missing: AtomicBool,
}

impl TableGate {
    /// A gate for a table assumed to exist
    pub fn available(table: &'static str) -> Self {
        Self {
            table,
            missing: AtomicBool::new(false),
        }
    }

    /// A gate already in degraded mode
    pub fn missing(table: &'static str) -> Self {
        Self {
            table,
            missing: AtomicBool::new(true),
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn is_available(&self) -> bool {
        !self.missing.load(Ordering::Acquire)
    }

    /// Switch to degraded mode. Returns true for the call that flipped it.
    pub fn mark_missing(&self, detail: &str) -> bool {
        let first = !self.missing.swap(true, Ordering::AcqRel);
        if first {
            warn!(
                table = self.table,
                detail,
                "Table is missing; continuing without it (run `docsync init` to create the schema)"
            );
        }
        first
    }
}

/// Availability of every table the stores depend on
#[derive(Debug, Clone)]
pub struct DatastoreAvailability {
    pub document_state: Arc<TableGate>,
    pub ingest_runs: Arc<TableGate>,
}

impl DatastoreAvailability {
    pub fn all_available() -> Self {
        Self {
            document_state: Arc::new(TableGate::available(DOCUMENT_STATE_TABLE)),
            ingest_runs: Arc::new(TableGate::available(INGEST_RUNS_TABLE)),
        }
    }

    pub fn with_document_state_missing(mut self) -> Self {
        self.document_state = Arc::new(TableGate::missing(DOCUMENT_STATE_TABLE));
        self
    }

    pub fn with_ingest_runs_missing(mut self) -> Self {
        self.ingest_runs = Arc::new(TableGate::missing(INGEST_RUNS_TABLE));
        self
    }
}

impl Default for DatastoreAvailability {
    fn default() -> Self {
        Self::all_available()
    }
}
