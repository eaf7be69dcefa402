//! Document sources
//!
//! A source lists candidate documents and fetches one at a time, handing the
//! pipeline plain text, a modification time and normalized metadata. Source
//! specific parsing stays behind this boundary.

mod export;
mod web;

pub use export::*;
pub use web::*;

use crate::error::Result;
use crate::hashing::NormalizedMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Two-field identity of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentIdentity {
    /// Stable, format-independent id used for state and chunk ownership
    pub canonical_id: String,
    /// Identifier exactly as the source reported it
    pub raw_id: String,
    pub source_url: Option<String>,
}

impl DocumentIdentity {
    pub fn new(canonical_id: impl Into<String>, raw_id: impl Into<String>) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            raw_id: raw_id.into(),
            source_url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// Current content of a document as extracted by its source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub identity: DocumentIdentity,
    pub title: Option<String>,
    pub plain_text: String,
    /// Source-reported modification time, any supported format
    pub last_modified: Option<String>,
    pub metadata: Option<NormalizedMetadata>,
}

/// A collaborator that produces documents for one ingestion run
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Run ledger source label, e.g. "web" or "notion-page"
    fn label(&self) -> &str;

    /// Documents to consider. Failing here aborts the run.
    async fn list_candidates(&self) -> Result<Vec<DocumentIdentity>>;

    /// Fetch one document. Failing here only fails that document.
    async fn fetch(&self, identity: &DocumentIdentity) -> Result<SourceDocument>;
}
