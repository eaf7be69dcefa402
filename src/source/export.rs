//! Exported workspace pages
//!
//! A workspace export is a directory tree of `*.json` files, one per page:
//!
//! ```json
//! { "id": "1a2b-...", "title": "Page", "text": "...", "last_edited_time": "...",
//!   "url": "https://...", "tags": ["a"], "properties": { "status": "Done" } }
//! ```

use super::{DocumentIdentity, DocumentSource, SourceDocument};
use crate::error::{Error, Result};
use crate::hashing::merge_metadata;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Source label for workspace page batches
pub const WORKSPACE_SOURCE_LABEL: &str = "notion-page";

/// Canonical page id: lower-cased, dashes removed
pub fn canonical_page_id(raw_id: &str) -> String {
    raw_id.trim().replace('-', "").to_lowercase()
}

#[derive(Debug, Deserialize)]
struct ExportedPage {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    last_edited_time: Option<Value>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// Reads pages from a workspace export directory
pub struct WorkspaceExportSource {
    root: PathBuf,
    paths: RwLock<HashMap<String, PathBuf>>,
}

impl WorkspaceExportSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: RwLock::new(HashMap::new()),
        }
    }

    fn page_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    }

    async fn read_page(path: &Path) -> Result<ExportedPage> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Source(format!("Malformed page export {}: {}", path.display(), e))
        })
    }

    /// Id of a page file, falling back to the file stem when the JSON
    /// cannot be read so the failure is attributed to one document.
    async fn peek_id(path: &Path) -> String {
        let id = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str::<Value>(&content)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string)),
            Err(_) => None,
        };
        id.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        })
    }
}

fn edited_time(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl DocumentSource for WorkspaceExportSource {
    fn label(&self) -> &str {
        WORKSPACE_SOURCE_LABEL
    }

    async fn list_candidates(&self) -> Result<Vec<DocumentIdentity>> {
        if !self.root.is_dir() {
            return Err(Error::Source(format!(
                "Workspace export directory not found: {}",
                self.root.display()
            )));
        }

        let mut paths = self.paths.write().await;
        paths.clear();

        let mut candidates = Vec::new();
        for path in self.page_files() {
            let raw_id = Self::peek_id(&path).await;
            let canonical = canonical_page_id(&raw_id);
            if canonical.is_empty() {
                continue;
            }
            if let Some(previous) = paths.get(&canonical) {
                warn!(
                    "Duplicate page id {} in {} (already read from {})",
                    raw_id,
                    path.display(),
                    previous.display()
                );
                continue;
            }
            paths.insert(canonical.clone(), path);
            candidates.push(DocumentIdentity::new(canonical, raw_id));
        }

        debug!("Found {} exported pages in {:?}", candidates.len(), self.root);
        Ok(candidates)
    }

    async fn fetch(&self, identity: &DocumentIdentity) -> Result<SourceDocument> {
        let path = self
            .paths
            .read()
            .await
            .get(&identity.canonical_id)
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(identity.canonical_id.clone()))?;

        let page = Self::read_page(&path).await?;

        let mut extra = Map::new();
        if let Some(tags) = page.tags {
            extra.insert("tags".to_string(), Value::from(tags));
        }
        if let Some(url) = &page.url {
            extra.insert("url".to_string(), Value::String(url.clone()));
        }
        let metadata = merge_metadata(page.properties.as_ref(), Some(&extra));

        let mut doc_identity = DocumentIdentity::new(identity.canonical_id.clone(), page.id);
        doc_identity.source_url = page.url;

        Ok(SourceDocument {
            identity: doc_identity,
            title: page.title.filter(|t| !t.trim().is_empty()),
            plain_text: page.text,
            last_modified: edited_time(page.last_edited_time),
            metadata,
        })
    }
}
